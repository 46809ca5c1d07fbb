//! HTTP error types for the bridge API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::transfer::TransferError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g. the agent schema cannot hold the write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Requested canonical identity does not resolve (422)
    #[error("Unresolved identity: {0}")]
    UnresolvedIdentity(String),

    /// Source ticket disappeared before promotion (409)
    #[error("Source vanished: {0}")]
    SourceVanished(String),

    /// System of record unreachable (503)
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<fincaops_common::Error> for ApiError {
    fn from(err: fincaops_common::Error) -> Self {
        match err {
            fincaops_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            fincaops_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::UnresolvedIdentity { fields } => {
                ApiError::UnresolvedIdentity(fields.join(", "))
            }
            TransferError::SourceVanished(id) => ApiError::SourceVanished(id),
            TransferError::RegistryUnavailable(msg) => ApiError::RegistryUnavailable(msg),
            TransferError::Other(inner) => inner.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::UnresolvedIdentity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNRESOLVED_IDENTITY",
                msg,
            ),
            ApiError::SourceVanished(msg) => (StatusCode::CONFLICT, "SOURCE_VANISHED", msg),
            ApiError::RegistryUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "REGISTRY_UNAVAILABLE",
                msg,
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
