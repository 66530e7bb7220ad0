//! File-per-session store.
//!
//! Each session lives in `{dir}/{upload_id}.json`. Writes go through a temp
//! file, fsync, and rename so a crash never leaves a half-written record.
//! Mutations serialize through one async mutex; the store is single-process
//! by definition, so a single writer lock is enough to rule out the
//! lost-update race between concurrent chunk uploads.

use super::{SessionStore, StoreError, StoreResult};
use crate::models::session::UploadSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::debug;
use uuid::Uuid;

pub struct FileSessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn session_path(&self, upload_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", upload_id))
    }

    async fn read_session(&self, path: &Path, upload_id: Uuid) -> StoreResult<Option<UploadSession>> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let session =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt(upload_id, err))?;
        Ok(Some(session))
    }

    async fn write_session(&self, session: &UploadSession) -> StoreResult<()> {
        let path = self.session_path(session.upload_id);
        let tmp_path = self.dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let raw = serde_json::to_vec(session)
            .map_err(|err| StoreError::Corrupt(session.upload_id, err))?;

        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_and_sync(&mut file, &raw).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}

async fn write_and_sync(file: &mut File, raw: &[u8]) -> std::io::Result<()> {
    file.write_all(raw).await?;
    file.flush().await?;
    file.sync_all().await
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, session: &UploadSession) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_session(session).await
    }

    async fn get(&self, upload_id: Uuid) -> StoreResult<Option<UploadSession>> {
        self.read_session(&self.session_path(upload_id), upload_id)
            .await
    }

    async fn delete(&self, upload_id: Uuid) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.session_path(upload_id)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn append_block_id(
        &self,
        upload_id: Uuid,
        block_id: &str,
    ) -> StoreResult<Option<UploadSession>> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(upload_id);
        let Some(mut session) = self.read_session(&path, upload_id).await? else {
            return Ok(None);
        };
        if !session.staged_block_ids.iter().any(|b| b == block_id) {
            session.staged_block_ids.push(block_id.to_string());
            self.write_session(&session).await?;
        }
        Ok(Some(session))
    }

    async fn mark_completed(&self, upload_id: Uuid) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.session_path(upload_id);
        let Some(mut session) = self.read_session(&path, upload_id).await? else {
            return Ok(false);
        };
        if !session.completed {
            session.completed = true;
            self.write_session(&session).await?;
        }
        Ok(true)
    }

    async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<Uuid>().ok())
            else {
                continue;
            };
            // A record that fails to parse is skipped, not treated as fatal:
            // the sweep is housekeeping and must not take the store down.
            match self.read_session(&path, id).await {
                Ok(Some(session)) if session.created_at < cutoff => {
                    fs::remove_file(&path).await?;
                    debug!("swept expired session {}", id);
                    removed += 1;
                }
                Ok(_) => {}
                Err(err) => debug!("skipping unreadable session {}: {}", id, err),
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> StoreResult<()> {
        fs::read_dir(&self.dir).await?;
        Ok(())
    }
}
