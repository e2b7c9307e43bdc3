//! Error types for the substrate, with an HTTP mapping for the API layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error taxonomy.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing/malformed input. Carries the wire error code, e.g. `text_required`.
    #[error("validation error: {0}")]
    Validation(&'static str),

    /// Resource absent. Carries the wire error code, e.g. `memory_not_found`.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// A memory exists but is soft-deleted; distinct from a generic not-found
    /// because `restore` responds 400, not 404, for this case.
    #[error("memory is deleted")]
    MemoryDeleted,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid(code: &'static str) -> Self {
        AppError::Validation(code)
    }

    /// Wire error code surfaced in `{error, message}` bodies.
    fn code(&self) -> &'static str {
        match self {
            AppError::Validation(code) => code,
            AppError::NotFound(code) => code,
            AppError::MemoryDeleted => "memory_deleted",
            AppError::Database(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                "server_error"
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MemoryDeleted => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "unhandled error");
        }
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
