pub mod generation;
pub mod health;

use axum::routing::post;
use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /generate        POST   run one staging request to completion
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().route("/generate", post(generation::generate))
}
