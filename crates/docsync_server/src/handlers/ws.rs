use axum::{
    Router,
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use docsync::{AdmittedSession, CloseReason, ConnectionGateway, Frame, Rejection};
use futures::{SinkExt, StreamExt, future};
use tracing::debug;

use super::error_response;
use crate::auth::headers_to_bag;
use crate::state::AppState;

pub fn ws_routes(state: AppState) -> Router {
    Router::new()
        .route("/collab/{document_id}", get(collab_handler))
        .with_state(state)
}

/// WebSocket upgrade handler.
///
/// The gate runs on the plain HTTP request; a rejected request is answered
/// with a status and JSON body and is never upgraded.
async fn collab_handler(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let session = match state
        .gateway
        .admit(&document_id, headers_to_bag(&headers))
        .await
    {
        Ok(session) => session,
        Err(rejection) => return rejection_response(rejection),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    debug!(
        "WebSocket upgrade: document={}, user={}",
        session.document_id(),
        session.identity().user_id
    );
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, session))
        .into_response()
}

fn rejection_response(rejection: Rejection) -> Response {
    let status = match rejection {
        Rejection::AuthFailed => StatusCode::UNAUTHORIZED,
        Rejection::AccessDenied => StatusCode::FORBIDDEN,
        Rejection::NotFound => StatusCode::NOT_FOUND,
    };
    error_response(status, rejection.code())
}

async fn handle_socket(socket: WebSocket, gateway: ConnectionGateway, session: AdmittedSession) {
    let (ws_tx, ws_rx) = socket.split();
    let sink = ws_tx.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(frame_to_message(frame))));
    let stream = ws_rx.filter_map(|message| {
        future::ready(match message {
            Ok(message) => message_to_frame(message).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });
    gateway.run(session, sink, stream).await;
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close(reason) => Message::Close(reason.map(|reason| CloseFrame {
            code: reason.code,
            reason: reason.reason.into(),
        })),
    }
}

/// Pings and pongs are answered by the transport and never reach the engine.
fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Text(text) => Some(Frame::Text(text.as_str().to_string())),
        Message::Close(frame) => Some(Frame::Close(
            frame.map(|frame| CloseReason::new(frame.code, frame.reason.as_str())),
        )),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}
