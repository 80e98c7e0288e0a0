//! HTTP error type for dkf-dlv

use crate::services::PipelineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g. docket already being delivered
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Common error: {0}")]
    Common(#[from] dkf_common::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => {
                let status = match err {
                    dkf_common::Error::NotFound(_) => StatusCode::NOT_FOUND,
                    dkf_common::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "COMMON_ERROR", err.to_string())
            }
            ApiError::Pipeline(ref err) => {
                let (status, code) = match err {
                    PipelineError::NothingStaged | PipelineError::InvalidRequest(_) => {
                        (StatusCode::BAD_REQUEST, "BAD_REQUEST")
                    }
                    PipelineError::DocketNotFound { .. } => (StatusCode::NOT_FOUND, "DOCKET_NOT_FOUND"),
                    PipelineError::DocketBusy(_) => (StatusCode::CONFLICT, "DOCKET_BUSY"),
                    PipelineError::Configuration(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR")
                    }
                    PipelineError::Destination { .. } | PipelineError::Internal(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };
                (status, code, err.to_string())
            }
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
