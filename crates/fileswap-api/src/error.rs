use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fileswap_types::ErrorResponse;
use thiserror::Error;
use tracing::error;

use crate::blob::BlobError;
use crate::engine::SwapError;

/// Errors returned by the HTTP handlers. Every variant renders as a JSON
/// body `{ "error": "..." }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    MissingField(&'static str),

    #[error("File too large")]
    TooLarge,

    #[error("Swap has expired")]
    Gone,

    #[error("Invalid form data: {0}")]
    Multipart(String),

    #[error("File not found")]
    FileNotFound,

    #[error("Blob storage error: {0}")]
    BlobSink(#[from] BlobError),

    #[error(transparent)]
    Swap(#[from] SwapError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingField(_) | ApiError::TooLarge | ApiError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Gone => StatusCode::GONE,
            ApiError::FileNotFound => StatusCode::NOT_FOUND,
            ApiError::BlobSink(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Swap(err) => match err {
                SwapError::NotFound(_) => StatusCode::NOT_FOUND,
                SwapError::AlreadyAttached { .. } | SwapError::InvalidState { .. } => {
                    StatusCode::BAD_REQUEST
                }
                SwapError::Conflict | SwapError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Client-facing message. Server-side details stay in the logs.
    fn message(&self) -> String {
        match self {
            ApiError::Swap(SwapError::NotFound(_)) => "Swap not found".to_string(),
            ApiError::Swap(SwapError::AlreadyAttached { .. }) => {
                "File already uploaded for this swap".to_string()
            }
            ApiError::Swap(SwapError::InvalidState { status, .. }) => {
                format!("Not ready for second file (swap is {})", status)
            }
            ApiError::Swap(_) => "Swap storage failure".to_string(),
            ApiError::BlobSink(_) => "File storage failure".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = ErrorResponse {
            error: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
