pub mod grids;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /grids/run                      WebSocket grid run
/// /grids/history                  past runs, newest first (GET)
/// /grids/history/{name}           forget a past run (DELETE)
/// /grids/exists                   output folder check (GET, ?folder=)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/grids", grids::router())
}
