//! The durable record tracking one in-progress or completed chunked upload.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An upload session, created before the first chunk is sent and mutated
/// once per successfully staged block.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadSession {
    /// Unique upload ID (returned to client).
    pub upload_id: Uuid,

    /// Target name of the final object. Immutable once set.
    pub filename: String,

    /// Declared total byte size. Used for progress estimation only; never
    /// enforced against the bytes actually received.
    pub total_size: u64,

    /// Nominal chunk size handed to the client at init.
    pub chunk_size: u64,

    /// Block ids staged so far, in arrival order of the successful stage
    /// calls. Never contains duplicates.
    pub staged_block_ids: Vec<String>,

    /// Terminal flag; set once the commit succeeds.
    pub completed: bool,

    /// Timestamp when the upload was initiated.
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(upload_id: Uuid, filename: String, total_size: u64, chunk_size: u64) -> Self {
        Self {
            upload_id,
            filename,
            total_size,
            chunk_size,
            staged_block_ids: Vec::new(),
            completed: false,
            created_at: Utc::now(),
        }
    }

    /// Estimated completion percentage in `[0, 100]`.
    ///
    /// The last chunk may be smaller than `chunk_size`, so this is an
    /// estimate, not a byte count; 100% is only guaranteed once the commit
    /// succeeds.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        let bytes_estimated = self.staged_block_ids.len() as f64 * self.chunk_size as f64;
        (bytes_estimated / self.total_size as f64 * 100.0).min(100.0)
    }
}

/// Derive the block id for a chunk of a session.
///
/// URL-safe base64 of `"{upload_id}_{chunk_index}"` — deterministic, so a
/// client-side retry of the same chunk index maps to the same block id,
/// and safe to use as a path component in file-backed blob stores.
pub fn block_id(upload_id: Uuid, chunk_index: u32) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(format!("{}_{}", upload_id, chunk_index))
}
