use crate::services::{admission::DenyReason, object_store::StoreError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
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
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        let status = match reason {
            DenyReason::InvalidSecret => StatusCode::UNAUTHORIZED,
            DenyReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        };
        AppError::new(status, reason.to_string())
    }
}

/// Clients see "not found" / "expired" / limit messages; integrity faults
/// and I/O failures are logged in full and reported generically.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "File not found"),
            StoreError::Expired(_) => AppError::new(StatusCode::GONE, "File has expired"),
            StoreError::BlobMissing(id) => {
                error!(id = %id, "serving 404 for object whose payload is missing");
                AppError::new(StatusCode::NOT_FOUND, "File not found on disk")
            }
            StoreError::TooLarge { max, .. } => AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!(
                    "File too large. Maximum size is {}MB",
                    max.div_ceil(1024 * 1024)
                ),
            ),
            StoreError::CapacityExceeded { max } => AppError::new(
                StatusCode::INSUFFICIENT_STORAGE,
                format!("Storage full. Maximum of {max} files reached."),
            ),
            other => {
                error!(error = %other, "storage failure");
                AppError::internal("Internal storage error")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        multipart_failure(&err)
    }
}

/// Status and message for a body that could not be read as multipart.
pub fn multipart_failure(err: &MultipartError) -> AppError {
    let status = err.status();
    warn!(error = %err.body_text(), %status, "rejected multipart body");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(status, "File too large")
    } else {
        AppError::new(status, err.body_text())
    }
}
