//! API error types and HTTP status mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::definitions::DefinitionError;
use crate::queue::QueueError;
use crate::scheduler::SchedulerError;
use crate::storage::StorageError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Rejected request with a machine-readable reason.
    BadRequest { code: &'static str, message: String },
    /// Resource not found.
    NotFound(String),
    /// Request conflict (e.g., duplicate task name).
    Conflict(String),
    /// Service unavailable (e.g., store or broker down).
    ServiceUnavailable(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Storage(e) => e.into(),
            SchedulerError::Queue(e) => e.into(),
            SchedulerError::ChannelError(_) => {
                ApiError::ServiceUnavailable("scheduler is not running".to_string())
            }
            SchedulerError::Schedule(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            StorageError::DuplicateKey(msg) => ApiError::Conflict(msg),
            StorageError::Unavailable(msg) => ApiError::ServiceUnavailable(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(msg) => ApiError::ServiceUnavailable(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<DefinitionError> for ApiError {
    fn from(err: DefinitionError) -> Self {
        match err {
            DefinitionError::InvalidCron(_) | DefinitionError::UnreachableWindow { .. } => {
                ApiError::BadRequest {
                    code: err.reason(),
                    message: err.to_string(),
                }
            }
            DefinitionError::DuplicateName(_) => ApiError::Conflict(err.to_string()),
            DefinitionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            DefinitionError::Storage(e) => e.into(),
        }
    }
}
