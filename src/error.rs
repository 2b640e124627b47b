use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Failures of the game operations, independent of the transport.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The store failed or could not be reached.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// No store is installed yet.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The caller did not identify as a known player.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Malformed request data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Valid request that the current session state does not allow.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// A concurrent writer won the race; the operation may be retried.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The session or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Whether repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Conflict(_)
        )
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { message } => ServiceError::Conflict(message),
            unavailable => ServiceError::Unavailable(unavailable),
        }
    }
}

/// Error returned by HTTP handlers, rendered as `{ "message", "retryable" }`.
#[derive(Debug, Error)]
pub enum AppError {
    /// Rejected input (400).
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing or malformed caller identity (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Unknown resource (404).
    #[error("not found: {0}")]
    NotFound(String),
    /// Clash with the current state (409).
    #[error("conflict: {message}")]
    Conflict {
        /// What clashed.
        message: String,
        /// Set when a concurrent writer caused the clash.
        retryable: bool,
    },
    /// Storage unavailable (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            AppError::Conflict { retryable, .. } => *retryable,
            AppError::ServiceUnavailable(_) => true,
            _ => false,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::PreconditionFailed(message) => AppError::Conflict {
                message,
                retryable: false,
            },
            ServiceError::Conflict(message) => AppError::Conflict {
                message,
                retryable: true,
            },
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = ErrorBody {
            retryable: self.retryable(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
