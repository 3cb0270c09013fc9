use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use docsync::{Rejection, StateSource};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use super::error_response;
use crate::auth::headers_to_bag;
use crate::state::AppState;

/// Server status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub active_rooms: usize,
    pub active_sessions: usize,
    pub dirty_rooms: usize,
}

/// Freshest known state of a document
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: String,
    pub title: String,
    /// Base64-encoded CRDT state
    pub state: String,
    pub projected_content: Value,
    pub source: StateSource,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/documents/{document_id}", get(get_document))
        .with_state(state)
}

/// GET /api/status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.registry.stats().await;
    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_rooms: stats.active_rooms,
        active_sessions: stats.active_sessions,
        dirty_rooms: stats.dirty_rooms,
    })
}

/// GET /api/documents/{document_id}
///
/// A missing document and one the caller cannot see both answer 404.
async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let bag = headers_to_bag(&headers);
    if docsync::auth::validate_document_id(&document_id).is_err() {
        return error_response(StatusCode::NOT_FOUND, Rejection::NotFound.code());
    }
    let document = match state.gate.authorize(&document_id, &bag) {
        Ok((_, document)) => document,
        Err(Rejection::AuthFailed) => {
            return error_response(StatusCode::UNAUTHORIZED, Rejection::AuthFailed.code());
        }
        Err(_) => return error_response(StatusCode::NOT_FOUND, Rejection::NotFound.code()),
    };

    let read = match state.reader.read(&document_id).await {
        Ok(read) => read,
        Err(e) => {
            error!("Failed to read document {}: {}", document_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
        }
    };

    let projected_content = match state.projector.project(&read.state) {
        Ok(value) => value,
        Err(e) => {
            warn!("Failed to project document {}: {}", document_id, e);
            Value::Null
        }
    };

    Json(DocumentResponse {
        id: document.id,
        title: document.title,
        state: base64::engine::general_purpose::STANDARD.encode(&read.state),
        projected_content,
        source: read.source,
        updated_at: read.updated_at,
    })
    .into_response()
}
