use crate::services::{reassembler::ReassemblyError, video_service::ServiceError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::{error, warn};

/// Error returned by handlers, rendered in the Fine Uploader response shape.
///
/// `code` lets a client tell integrity failures (`missing_part`,
/// `size_mismatch`) apart from generic I/O trouble, and `prevent_retry`
/// tells Fine Uploader not to resend the same request.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub prevent_retry: bool,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            prevent_retry: false,
        }
    }

    /// Shortcut for a 400 Bad Request the client should not retry.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", msg).final_failure()
    }

    fn final_failure(mut self) -> Self {
        self.prevent_retry = true;
        self
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
        if self.status.is_server_error() {
            error!("request failed: {}", self.message);
        } else {
            warn!("request rejected: {}", self.message);
        }

        let body = Json(json!({
            "success": false,
            "error": self.message,
            "code": self.code,
            "preventRetry": self.prevent_retry,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Layout(_) => AppError::bad_request(message),
            ServiceError::Reassembly(inner) => AppError::from(inner),
            ServiceError::UploadNotFound(_) | ServiceError::VideoNotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message)
            }
            ServiceError::Sqlx(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "database_error", message)
            }
            ServiceError::Io(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "io_error", message)
            }
        }
    }
}

impl From<ReassemblyError> for AppError {
    fn from(err: ReassemblyError) -> Self {
        let message = err.to_string();
        match err {
            ReassemblyError::Layout(_) => AppError::bad_request(message),
            // Consumed parts are gone: only a fresh upload can recover.
            ReassemblyError::MissingPart { .. } => {
                AppError::new(StatusCode::CONFLICT, "missing_part", message).final_failure()
            }
            ReassemblyError::SizeMismatch { .. } => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "size_mismatch", message)
                    .final_failure()
            }
            ReassemblyError::OutputCreateFailed { .. }
            | ReassemblyError::CopyFailed { .. }
            | ReassemblyError::FinalizeFailed { .. } => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "io_error", message)
            }
        }
    }
}
