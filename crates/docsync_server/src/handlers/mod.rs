pub mod api;
pub mod ws;

pub use api::api_routes;
pub use ws::ws_routes;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::state::AppState;

/// All routes, without CORS or tracing layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "docsync server" }))
        .route("/health", get(|| async { "OK" }))
        .merge(ws_routes(state.clone()))
        .nest("/api", api_routes(state))
}

/// `{"error": code}` with the given status.
pub(crate) fn error_response(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "error": code }))).into_response()
}
