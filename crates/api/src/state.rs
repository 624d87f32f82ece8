use std::sync::Arc;

use gridgen_pipeline::GridRunner;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Executes grid runs and owns the run history cache.
    pub runner: Arc<GridRunner>,
}

impl AppState {
    /// The user every request is attributed to.
    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }
}
