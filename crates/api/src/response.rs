//! Shared response envelope types for API handlers.
//!
//! Query responses use a `{ "data": ... }` envelope. Grid run progress is
//! streamed over the run socket as bare event objects instead.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// ```ignore
/// Ok(Json(DataResponse { data: names }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
