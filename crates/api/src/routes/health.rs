use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the output directory exists and is a directory.
    pub output_dir_ready: bool,
}

/// GET /health -- returns service and output directory health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let output_dir_ready = tokio::fs::metadata(&state.runner.config().output_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let status = if output_dir_ready { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        output_dir_ready,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
