//! Route definitions for the `/grids` resource.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::grids;
use crate::state::AppState;

/// Routes mounted at `/grids`.
///
/// ```text
/// GET    /run               -> run_socket (WebSocket upgrade)
/// GET    /history           -> list_history
/// DELETE /history/{*name}   -> delete_history (name may be nested, a/b)
/// GET    /exists            -> folder_exists (?folder=name)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", get(grids::run_socket))
        .route("/history", get(grids::list_history))
        .route("/history/{*name}", delete(grids::delete_history))
        .route("/exists", get(grids::folder_exists))
}
