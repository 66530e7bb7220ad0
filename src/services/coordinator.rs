//! Upload-session lifecycle and block-staging coordinator.
//!
//! Orchestrates chunk staging against the blob backend, retries transient
//! backend failures with exponential backoff, records staged block ids in
//! the session store, and drives completion, resumption, and cancellation.
//! Holds no per-session state between calls; the session store is the only
//! source of truth.

use crate::models::session::{self, UploadSession};
use crate::services::{
    blob_backend::{BlobBackend, BlobError},
    session_store::{SessionStore, StoreError},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("declared size {declared} exceeds maximum allowed ({max} bytes)")]
    SizeExceeded { declared: u64, max: u64 },
    #[error("invalid filename: {0}")]
    InvalidFilename(String),
    #[error("upload session `{0}` not found")]
    SessionNotFound(Uuid),
    #[error("upload `{0}` is already completed")]
    AlreadyCompleted(Uuid),
    #[error("staging block `{block_id}` failed after {attempts} attempts")]
    StagingFailed {
        block_id: String,
        attempts: u32,
        #[source]
        source: BlobError,
    },
    #[error("committing {blocks} blocks for `{object}` failed after {attempts} attempts")]
    CommitFailed {
        object: String,
        blocks: usize,
        attempts: u32,
        #[source]
        source: BlobError,
    },
    #[error("session store unavailable")]
    Store(#[from] StoreError),
}

impl UploadError {
    /// Whether a client-side resumable uploader may usefully re-attempt the
    /// same call. Size, not-found, and already-completed failures are
    /// permanent; exhausted backend retries may clear up.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            UploadError::StagingFailed { .. }
                | UploadError::CommitFailed { .. }
                | UploadError::Store(_)
        )
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Retry budget for blob backend calls: `attempts` tries total, sleeping
/// `base_delay * 2^(n-1)` after failed attempt `n`. The backoff sleeps on
/// the task only, so unrelated uploads proceed unimpeded.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Upload size limits handed out at init time.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub chunk_size: u64,
    pub max_file_size: u64,
}

impl UploadLimits {
    /// Request-body budget for the chunk endpoint: one full chunk of the
    /// advertised size plus headroom for the multipart framing and the
    /// `upload_id`/`chunk_index` form fields. The transport layer must
    /// accept at least this much or conforming clients get rejected.
    pub fn chunk_request_body_limit(&self) -> usize {
        const MULTIPART_OVERHEAD: usize = 64 * 1024;
        usize::try_from(self.chunk_size)
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD)
    }
}

#[derive(Debug, Serialize)]
pub struct InitReceipt {
    pub upload_id: Uuid,
    pub chunk_size: u64,
}

#[derive(Debug, Serialize)]
pub struct StagedChunk {
    pub block_id: String,
    pub progress_percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub upload_id: Uuid,
    pub filename: String,
    pub total_size: u64,
    pub block_count: usize,
}

/// Read projection of a session, as returned by the status operation.
#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub upload_id: Uuid,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub completed_chunks: usize,
    pub progress_percentage: f64,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&UploadSession> for SessionStatus {
    fn from(session: &UploadSession) -> Self {
        Self {
            upload_id: session.upload_id,
            filename: session.filename.clone(),
            total_size: session.total_size,
            chunk_size: session.chunk_size,
            completed_chunks: session.staged_block_ids.len(),
            progress_percentage: session.progress_percentage(),
            completed: session.completed,
            created_at: session.created_at,
        }
    }
}

/// Status plus the staged block id list, enough for a client to compute
/// which chunk indices remain to send.
#[derive(Debug, Serialize)]
pub struct ResumeInfo {
    #[serde(flatten)]
    pub status: SessionStatus,
    pub block_ids: Vec<String>,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn BlobBackend>,
    limits: UploadLimits,
    retry: RetryPolicy,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn BlobBackend>,
        limits: UploadLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            backend,
            limits,
            retry,
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn BlobBackend> {
        &self.backend
    }

    /// Start a new upload session.
    pub async fn init_upload(&self, filename: &str, declared_size: u64) -> UploadResult<InitReceipt> {
        ensure_filename_safe(filename)?;
        if declared_size > self.limits.max_file_size {
            return Err(UploadError::SizeExceeded {
                declared: declared_size,
                max: self.limits.max_file_size,
            });
        }

        let session = UploadSession::new(
            Uuid::new_v4(),
            filename.to_string(),
            declared_size,
            self.limits.chunk_size,
        );
        self.store.create(&session).await?;

        info!("initialized upload {} for file {}", session.upload_id, filename);
        Ok(InitReceipt {
            upload_id: session.upload_id,
            chunk_size: self.limits.chunk_size,
        })
    }

    /// Stage one chunk of an upload.
    ///
    /// The block id is derived from `(upload_id, chunk_index)`, so a client
    /// retrying the same index re-stages the same block and the session
    /// records it only once. On a final staging failure the session is left
    /// exactly as it was.
    pub async fn stage_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: u32,
        payload: Bytes,
    ) -> UploadResult<StagedChunk> {
        let session = self.fetch_active(upload_id).await?;
        let block_id = session::block_id(upload_id, chunk_index);

        let mut delay = self.retry.base_delay;
        let mut attempt = 1;
        loop {
            match self
                .backend
                .stage_block(&session.filename, &block_id, payload.clone())
                .await
            {
                Ok(()) => break,
                Err(err) if attempt < self.retry.attempts => {
                    warn!(
                        "attempt {}/{} failed for block {}: {}. retrying in {:?}",
                        attempt, self.retry.attempts, block_id, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    error!("error staging block {}: {}", block_id, err);
                    return Err(UploadError::StagingFailed {
                        block_id,
                        attempts: self.retry.attempts,
                        source: err,
                    });
                }
            }
        }

        // A concurrent cancel may have removed the session while the block
        // was in flight; surface that as not-found rather than resurrecting.
        let updated = self
            .store
            .append_block_id(upload_id, &block_id)
            .await?
            .ok_or(UploadError::SessionNotFound(upload_id))?;

        info!("staged chunk {} for upload {}", chunk_index, upload_id);
        Ok(StagedChunk {
            block_id,
            progress_percentage: updated.progress_percentage(),
        })
    }

    /// Commit all staged blocks, in recorded order, and mark the session
    /// terminal. On commit failure the session stays open: the caller may
    /// stage more chunks or retry completion.
    ///
    /// Completion does not wait for in-flight `stage_chunk` calls; blocks
    /// still being staged when this runs are not part of the committed
    /// object. Sequencing stage calls before completion is the caller's
    /// responsibility.
    pub async fn complete_upload(&self, upload_id: Uuid) -> UploadResult<UploadSummary> {
        let session = self.fetch_active(upload_id).await?;

        let mut delay = self.retry.base_delay;
        let mut attempt = 1;
        loop {
            match self
                .backend
                .commit_block_list(&session.filename, &session.staged_block_ids)
                .await
            {
                Ok(()) => break,
                Err(err) if attempt < self.retry.attempts => {
                    warn!(
                        "attempt {}/{} failed to commit blocks for {}: {}. retrying in {:?}",
                        attempt, self.retry.attempts, session.filename, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    error!("error committing block list for {}: {}", session.filename, err);
                    return Err(UploadError::CommitFailed {
                        object: session.filename,
                        blocks: session.staged_block_ids.len(),
                        attempts: self.retry.attempts,
                        source: err,
                    });
                }
            }
        }

        self.store.mark_completed(upload_id).await?;

        info!("completed upload {}", upload_id);
        Ok(UploadSummary {
            upload_id,
            filename: session.filename,
            total_size: session.total_size,
            block_count: session.staged_block_ids.len(),
        })
    }

    /// Read projection of the session with computed progress.
    pub async fn get_status(&self, upload_id: Uuid) -> UploadResult<SessionStatus> {
        let session = self.fetch(upload_id).await?;
        Ok(SessionStatus::from(&session))
    }

    /// Status plus the staged block id list and chunk size, so an
    /// interrupted client can work out which chunk indices remain.
    pub async fn resume_upload(&self, upload_id: Uuid) -> UploadResult<ResumeInfo> {
        let session = self.fetch(upload_id).await?;
        Ok(ResumeInfo {
            status: SessionStatus::from(&session),
            block_ids: session.staged_block_ids,
        })
    }

    /// Delete the session. Blocks already staged with the backend are left
    /// to its own staging-area hygiene.
    pub async fn cancel_upload(&self, upload_id: Uuid) -> UploadResult<()> {
        self.fetch(upload_id).await?;
        self.store.delete(upload_id).await?;
        info!("deleted upload {}", upload_id);
        Ok(())
    }

    async fn fetch(&self, upload_id: Uuid) -> UploadResult<UploadSession> {
        self.store
            .get(upload_id)
            .await?
            .ok_or(UploadError::SessionNotFound(upload_id))
    }

    async fn fetch_active(&self, upload_id: Uuid) -> UploadResult<UploadSession> {
        let session = self.fetch(upload_id).await?;
        if session.completed {
            return Err(UploadError::AlreadyCompleted(upload_id));
        }
        Ok(session)
    }
}

/// Reject object names that could escape the backend's namespace. Same
/// rules the wider pack applies to untrusted keys: no empty names, no
/// absolute paths, no traversal, no control characters.
fn ensure_filename_safe(filename: &str) -> UploadResult<()> {
    if filename.is_empty() || filename.len() > 1024 {
        return Err(UploadError::InvalidFilename(filename.to_string()));
    }
    if filename.starts_with('/') || filename.contains("..") {
        return Err(UploadError::InvalidFilename(filename.to_string()));
    }
    if filename
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(UploadError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}
