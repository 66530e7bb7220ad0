//! HTTP handlers for the upload lifecycle.
//!
//! Thin translation layer: parse the request, call the coordinator, shape
//! the response. All upload semantics live in `UploadCoordinator`.

use crate::{errors::AppError, services::coordinator::UploadCoordinator};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Body for `POST /api/upload/init`.
#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub file_size: u64,
}

/// Body for `POST /api/upload/complete`.
#[derive(Debug, Deserialize)]
pub struct CompleteUploadRequest {
    pub upload_id: Uuid,
}

/// `POST /api/upload/init` — start a new upload session.
pub async fn init_upload(
    State(coordinator): State<UploadCoordinator>,
    Json(req): Json<InitUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = coordinator.init_upload(&req.filename, req.file_size).await?;
    Ok(Json(json!({
        "upload_id": receipt.upload_id,
        "chunk_size": receipt.chunk_size,
        "message": "Upload initialized"
    })))
}

/// `POST /api/upload/chunk` — stage one chunk.
///
/// Multipart form with three fields: `upload_id`, `chunk_index`, and the
/// chunk bytes under `file`.
pub async fn upload_chunk(
    State(coordinator): State<UploadCoordinator>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut upload_id: Option<Uuid> = None;
    let mut chunk_index: Option<u32> = None;
    let mut payload: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {}", err)))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("upload_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                upload_id = Some(
                    text.parse()
                        .map_err(|_| AppError::bad_request("upload_id is not a valid UUID"))?,
                );
            }
            Some("chunk_index") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                chunk_index = Some(
                    text.parse()
                        .map_err(|_| AppError::bad_request("chunk_index is not a valid integer"))?,
                );
            }
            Some("file") => {
                payload = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|err| AppError::bad_request(err.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let upload_id = upload_id.ok_or_else(|| AppError::bad_request("missing field `upload_id`"))?;
    let chunk_index =
        chunk_index.ok_or_else(|| AppError::bad_request("missing field `chunk_index`"))?;
    let payload = payload.ok_or_else(|| AppError::bad_request("missing field `file`"))?;

    let staged = coordinator
        .stage_chunk(upload_id, chunk_index, payload)
        .await?;
    Ok(Json(json!({
        "chunk_index": chunk_index,
        "block_id": staged.block_id,
        "progress_percentage": staged.progress_percentage,
        "message": "Chunk uploaded successfully"
    })))
}

/// `POST /api/upload/complete` — commit all staged blocks.
pub async fn complete_upload(
    State(coordinator): State<UploadCoordinator>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    let summary = coordinator.complete_upload(req.upload_id).await?;
    Ok(Json(json!({
        "upload_id": summary.upload_id,
        "filename": summary.filename,
        "file_size": summary.total_size,
        "blocks_count": summary.block_count,
        "message": "Upload completed successfully"
    })))
}

/// `GET /api/upload/status/{upload_id}` — session view with progress.
pub async fn get_upload_status(
    State(coordinator): State<UploadCoordinator>,
    Path(upload_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = coordinator.get_status(upload_id).await?;
    Ok(Json(status))
}

/// `GET /api/upload/resume/{upload_id}` — resumption view: everything the
/// status reports plus the staged block id list.
pub async fn resume_upload(
    State(coordinator): State<UploadCoordinator>,
    Path(upload_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let resume = coordinator.resume_upload(upload_id).await?;
    Ok(Json(resume))
}

/// `DELETE /api/upload/{upload_id}` — cancel an upload.
pub async fn delete_upload(
    State(coordinator): State<UploadCoordinator>,
    Path(upload_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    coordinator.cancel_upload(upload_id).await?;
    Ok(Json(json!({
        "upload_id": upload_id,
        "message": "Upload deleted"
    })))
}

/// `GET /api/config` — the knobs a client needs to chunk its payload.
pub async fn get_config(
    State(coordinator): State<UploadCoordinator>,
) -> Result<impl IntoResponse, AppError> {
    let limits = coordinator.limits();
    Ok(Json(json!({
        "chunk_size": limits.chunk_size,
        "max_file_size": limits.max_file_size
    })))
}
