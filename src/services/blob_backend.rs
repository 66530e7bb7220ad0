//! Blob backend capability: stage individual blocks under opaque ids, then
//! commit an ordered list of them into the final object.
//!
//! The coordinator is written against this trait, not against any concrete
//! provider. The shipped implementation stages blocks on the local
//! filesystem; a cloud provider with a native stage/commit block protocol
//! slots in behind the same trait.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("block `{block_id}` for object `{object}` was never staged")]
    BlockMissing { object: String, block_id: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Size and timestamps of a committed object.
#[derive(Debug, Clone)]
pub struct ObjectProperties {
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Stage one block of bytes for an object. Staging the same block id
    /// twice must be a safe overwrite with identical content.
    async fn stage_block(&self, object_name: &str, block_id: &str, payload: Bytes)
    -> BlobResult<()>;

    /// Assemble the final object from previously staged blocks, in exactly
    /// the given order. An empty list produces an empty object.
    async fn commit_block_list(&self, object_name: &str, block_ids: &[String]) -> BlobResult<()>;

    /// Remove a committed object.
    async fn delete_object(&self, object_name: &str) -> BlobResult<()>;

    /// Size and timestamps of a committed object.
    async fn get_object_properties(&self, object_name: &str) -> BlobResult<ObjectProperties>;

    /// Cheap readiness probe.
    async fn ping(&self) -> BlobResult<()>;
}

/// Local-disk backend. Staged blocks live under
/// `{base}/.staging/{object}/{block_id}`; commit concatenates them into a
/// temp file and renames it to `{base}/{object}`.
pub struct FsBlobBackend {
    base_path: PathBuf,
}

const STAGING_DIR: &str = ".staging";

impl FsBlobBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(base_path.join(STAGING_DIR))?;
        Ok(Self { base_path })
    }

    fn object_path(&self, object_name: &str) -> PathBuf {
        self.base_path.join(object_name)
    }

    fn staging_dir(&self, object_name: &str) -> PathBuf {
        self.base_path.join(STAGING_DIR).join(object_name)
    }

    fn block_path(&self, object_name: &str, block_id: &str) -> PathBuf {
        self.staging_dir(object_name).join(block_id)
    }
}

async fn write_durably(path: &Path, tmp_dir: &Path, payload: &[u8]) -> io::Result<()> {
    let tmp_path = tmp_dir.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;
    let write = async {
        file.write_all(payload).await?;
        file.flush().await?;
        file.sync_all().await
    };
    if let Err(err) = write.await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err);
    }
    Ok(())
}

#[async_trait]
impl BlobBackend for FsBlobBackend {
    async fn stage_block(
        &self,
        object_name: &str,
        block_id: &str,
        payload: Bytes,
    ) -> BlobResult<()> {
        let dir = self.staging_dir(object_name);
        fs::create_dir_all(&dir).await?;
        write_durably(&self.block_path(object_name, block_id), &dir, &payload).await?;
        debug!("staged block {} for object {}", block_id, object_name);
        Ok(())
    }

    async fn commit_block_list(&self, object_name: &str, block_ids: &[String]) -> BlobResult<()> {
        let final_path = self.object_path(object_name);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = self
            .base_path
            .join(format!(".tmp-commit-{}", Uuid::new_v4()));
        let mut out = File::create(&tmp_path).await?;

        let assemble = async {
            for block_id in block_ids {
                let block = match fs::read(self.block_path(object_name, block_id)).await {
                    Ok(block) => block,
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        return Err(BlobError::BlockMissing {
                            object: object_name.to_string(),
                            block_id: block_id.clone(),
                        });
                    }
                    Err(err) => return Err(err.into()),
                };
                out.write_all(&block).await?;
            }
            out.flush().await?;
            out.sync_all().await?;
            Ok(())
        };
        if let Err(err) = assemble.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        // Staged blocks are spent once committed.
        if let Err(err) = fs::remove_dir_all(self.staging_dir(object_name)).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "could not clean staging dir for {}: {}",
                    object_name, err
                );
            }
        }
        debug!(
            "committed {} blocks into object {}",
            block_ids.len(),
            object_name
        );
        Ok(())
    }

    async fn delete_object(&self, object_name: &str) -> BlobResult<()> {
        match fs::remove_file(self.object_path(object_name)).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(BlobError::ObjectNotFound(object_name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_object_properties(&self, object_name: &str) -> BlobResult<ObjectProperties> {
        let meta = match fs::metadata(self.object_path(object_name)).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BlobError::ObjectNotFound(object_name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        Ok(ObjectProperties {
            size: meta.len(),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn ping(&self) -> BlobResult<()> {
        fs::metadata(&self.base_path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, FsBlobBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBlobBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn commit_concatenates_blocks_in_given_order() {
        let (dir, backend) = backend();
        backend
            .stage_block("out.bin", "b1", Bytes::from_static(b"hello "))
            .await
            .unwrap();
        backend
            .stage_block("out.bin", "b2", Bytes::from_static(b"world"))
            .await
            .unwrap();

        backend
            .commit_block_list("out.bin", &["b1".into(), "b2".into()])
            .await
            .unwrap();

        let contents = std::fs::read(dir.path().join("out.bin")).unwrap();
        assert_eq!(contents, b"hello world");
        // Staging area is cleaned up after commit.
        assert!(!dir.path().join(".staging/out.bin").exists());
    }

    #[tokio::test]
    async fn restaging_a_block_overwrites_it() {
        let (dir, backend) = backend();
        backend
            .stage_block("out.bin", "b1", Bytes::from_static(b"first"))
            .await
            .unwrap();
        backend
            .stage_block("out.bin", "b1", Bytes::from_static(b"again"))
            .await
            .unwrap();
        backend
            .commit_block_list("out.bin", &["b1".into()])
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"again");
    }

    #[tokio::test]
    async fn empty_commit_produces_empty_object() {
        let (dir, backend) = backend();
        backend.commit_block_list("empty.bin", &[]).await.unwrap();
        let meta = std::fs::metadata(dir.path().join("empty.bin")).unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[tokio::test]
    async fn commit_with_missing_block_fails() {
        let (_dir, backend) = backend();
        backend
            .stage_block("out.bin", "b1", Bytes::from_static(b"x"))
            .await
            .unwrap();
        let err = backend
            .commit_block_list("out.bin", &["b1".into(), "ghost".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::BlockMissing { block_id, .. } if block_id == "ghost"));
    }

    #[tokio::test]
    async fn properties_and_delete_round_trip() {
        let (_dir, backend) = backend();
        backend
            .stage_block("a.bin", "b1", Bytes::from_static(b"12345"))
            .await
            .unwrap();
        backend
            .commit_block_list("a.bin", &["b1".into()])
            .await
            .unwrap();

        let props = backend.get_object_properties("a.bin").await.unwrap();
        assert_eq!(props.size, 5);

        backend.delete_object("a.bin").await.unwrap();
        assert!(matches!(
            backend.get_object_properties("a.bin").await.unwrap_err(),
            BlobError::ObjectNotFound(_)
        ));
        assert!(matches!(
            backend.delete_object("a.bin").await.unwrap_err(),
            BlobError::ObjectNotFound(_)
        ));
    }
}
