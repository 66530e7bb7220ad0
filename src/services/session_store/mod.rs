//! Durable mapping from upload id to session state.
//!
//! Trait-based abstraction with two interchangeable backends: a
//! file-per-session store for single-process deployments and a Redis store
//! for anything networked. Both behave identically from the coordinator's
//! point of view; the backend is chosen once at startup.

pub mod file;
pub mod redis;

use crate::models::session::UploadSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{io, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

pub use self::file::FileSessionStore;
pub use self::redis::RedisSessionStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session record for `{0}` is corrupt: {1}")]
    Corrupt(Uuid, #[source] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Redis(#[from] ::redis::RedisError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Contract every session store backend must satisfy.
///
/// Mutating operations are read-modify-write over the whole session record.
/// Each backend is responsible for making concurrent mutations of the same
/// session safe: the file store serializes writers, the redis store runs
/// them as atomic server-side scripts.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a freshly created session.
    async fn create(&self, session: &UploadSession) -> StoreResult<()>;

    /// Fetch a session. An unknown id is `Ok(None)`, never an error.
    async fn get(&self, upload_id: Uuid) -> StoreResult<Option<UploadSession>>;

    /// Remove a session. A no-op on unknown ids.
    async fn delete(&self, upload_id: Uuid) -> StoreResult<()>;

    /// Append a block id to the session, skipping the append if it is
    /// already present. Returns the post-append session, or `None` when the
    /// session does not exist.
    async fn append_block_id(
        &self,
        upload_id: Uuid,
        block_id: &str,
    ) -> StoreResult<Option<UploadSession>>;

    /// Set the terminal flag. Returns whether the session existed.
    async fn mark_completed(&self, upload_id: Uuid) -> StoreResult<bool>;

    /// Delete sessions created before `cutoff`; returns how many were
    /// removed. Drives the optional retention policy.
    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Cheap readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// Which backend to run, selected from configuration at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Redis,
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StoreKind::File),
            "redis" => Ok(StoreKind::Redis),
            other => Err(format!("unknown session store kind `{}`", other)),
        }
    }
}

/// Build the configured store. The coordinator only ever sees the trait.
pub async fn build_store(
    kind: StoreKind,
    session_dir: &str,
    redis_url: &str,
) -> anyhow::Result<Arc<dyn SessionStore>> {
    match kind {
        StoreKind::File => Ok(Arc::new(FileSessionStore::new(session_dir)?)),
        StoreKind::Redis => Ok(Arc::new(RedisSessionStore::connect(redis_url).await?)),
    }
}
