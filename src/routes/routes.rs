//! Defines routes for the upload lifecycle.
//!
//! ## Structure
//! - **Upload endpoints**
//!   - `POST   /api/upload/init` — start a session
//!   - `POST   /api/upload/chunk` — stage one chunk (multipart form)
//!   - `POST   /api/upload/complete` — commit staged blocks
//!   - `GET    /api/upload/status/{upload_id}` — progress view
//!   - `GET    /api/upload/resume/{upload_id}` — resumption view
//!   - `DELETE /api/upload/{upload_id}` — cancel a session
//!   - `GET    /api/config` — chunking parameters for clients
//!
//! Health endpoints (`/healthz`, `/readyz`) are mounted at the root.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{
            complete_upload, delete_upload, get_config, get_upload_status, init_upload,
            resume_upload, upload_chunk,
        },
    },
    services::coordinator::UploadCoordinator,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build and return the router for all upload routes.
///
/// The router carries shared state (`UploadCoordinator`) to all handlers.
/// `chunk_body_limit` raises the request-body cap on the chunk endpoint so
/// that chunks of the advertised size fit; see
/// [`UploadLimits::chunk_request_body_limit`](crate::services::coordinator::UploadLimits::chunk_request_body_limit).
pub fn routes(chunk_body_limit: usize) -> Router<UploadCoordinator> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // upload lifecycle
        .route("/api/upload/init", post(init_upload))
        .route(
            "/api/upload/chunk",
            post(upload_chunk).layer(DefaultBodyLimit::max(chunk_body_limit)),
        )
        .route("/api/upload/complete", post(complete_upload))
        .route("/api/upload/status/{upload_id}", get(get_upload_status))
        .route("/api/upload/resume/{upload_id}", get(resume_upload))
        .route("/api/upload/{upload_id}", delete(delete_upload))
        .route("/api/config", get(get_config))
}
