use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use gridgen_core::error::GridError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`GridError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce the `{ "error", "code" }` envelope
/// that terminal run events also use.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `gridgen_core`.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The named resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- GridError variants ---
            AppError::Grid(grid) => {
                let status = match grid {
                    GridError::Configuration(_)
                    | GridError::UnsupportedLayout { .. }
                    | GridError::PresetNotFound(_) => StatusCode::BAD_REQUEST,
                    GridError::Generation { .. } => StatusCode::BAD_GATEWAY,
                    GridError::Persistence(_) | GridError::Internal(_) => {
                        tracing::error!(error = %grid, "Internal grid error");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, grid.code(), grid.client_message())
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
