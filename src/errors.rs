use crate::services::coordinator::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
///
/// `retryable` tells a resumable client whether re-attempting the same call
/// can succeed (transient backend/store trouble) or is pointless (bad
/// request, unknown session, terminal session).
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub retryable: bool,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            retryable: false,
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16(),
            "retryable": self.retryable
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::SizeExceeded { .. } | UploadError::InvalidFilename(_) => {
                StatusCode::BAD_REQUEST
            }
            UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::AlreadyCompleted(_) => StatusCode::CONFLICT,
            UploadError::StagingFailed { .. } | UploadError::CommitFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            UploadError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            retryable: err.retryable(),
            message: err.to_string(),
        }
    }
}
