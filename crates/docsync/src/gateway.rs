//! Transport-agnostic connection gateway.
//!
//! [`ConnectionGateway`] admits a connection through the authentication gate
//! and then drives one joined session over any frame transport: a `Sink` of
//! outgoing [`Frame`]s and a `Stream` of incoming ones. The server crate
//! adapts axum WebSockets to this shape; tests use in-memory channels.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthenticationGate, HeaderBag, Rejection};
use crate::error::SyncError;
use crate::protocol::{ClientControlMessage, CloseReason, Frame, ServerControlMessage, WireMessage};
use crate::registry::RoomRegistry;
use crate::session::{AdmittedSession, JoinedSession, Outbound, PendingConnection};

/// Why a session loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The client closed the connection or the stream ended.
    Client,
    /// The room dropped the session because its outbound queue overflowed.
    Evicted,
    /// The client sent a frame that could not be decoded or merged.
    Protocol(String),
    /// Writing to the client failed.
    Transport(String),
    /// The session could not join its room.
    Unavailable(String),
}

#[derive(Clone)]
pub struct ConnectionGateway {
    gate: Arc<dyn AuthenticationGate>,
    registry: RoomRegistry,
}

impl ConnectionGateway {
    pub fn new(gate: Arc<dyn AuthenticationGate>, registry: RoomRegistry) -> Self {
        Self { gate, registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Authenticate a connection attempt before any transport upgrade.
    pub async fn admit(
        &self,
        document_id: &str,
        headers: HeaderBag,
    ) -> Result<AdmittedSession, Rejection> {
        let pending = PendingConnection::new(document_id, headers);
        match pending.authenticate(self.gate.as_ref()).await {
            Ok(session) => {
                debug!(
                    session_id = %session.id(),
                    document_id,
                    user_id = %session.identity().user_id,
                    "admitted"
                );
                Ok(session)
            }
            Err(rejection) => {
                warn!(document_id, reason = rejection.code(), "connection rejected");
                Err(rejection)
            }
        }
    }

    /// Join the session's room and pump frames until either side goes away.
    ///
    /// Inbound updates are awaited one at a time, so a session's updates are
    /// merged in the order it sent them.
    pub async fn run<S, R, E>(&self, session: AdmittedSession, mut sink: S, mut stream: R) -> Disconnect
    where
        S: Sink<Frame> + Unpin,
        S::Error: Display,
        R: Stream<Item = Result<Frame, E>> + Unpin,
        E: Display,
    {
        let session_id = session.id();
        let document_id = session.document_id().to_string();
        let user_id = session.identity().user_id.clone();

        let (joined, ack, mut outbound) = match session.join(&self.registry).await {
            Ok(joined) => joined,
            Err(e) => {
                error!(%session_id, %document_id, "failed to join room: {}", e);
                let close = CloseReason::new(CloseReason::INTERNAL_ERROR, "room unavailable");
                let _ = sink.send(Frame::Close(Some(close))).await;
                return Disconnect::Unavailable(e.to_string());
            }
        };

        info!(%session_id, %document_id, %user_id, peers = ack.peer_count, "opened");

        let mut greeting = vec![Frame::from(WireMessage::SyncStep1(ack.state_vector))];
        greeting.extend(
            ack.peer_awareness
                .into_iter()
                .map(|payload| Frame::from(WireMessage::Awareness(payload))),
        );
        for frame in greeting {
            if let Err(e) = sink.send(frame).await {
                return self.finish(joined, Disconnect::Transport(e.to_string()));
            }
        }

        let mut synced = false;
        let outcome = loop {
            tokio::select! {
                message = outbound.recv() => {
                    let Some(message) = message else {
                        let close = CloseReason::new(CloseReason::POLICY_VIOLATION, "session dropped");
                        let _ = sink.send(Frame::Close(Some(close))).await;
                        break Disconnect::Evicted;
                    };
                    if let Err(e) = sink.send(Frame::from(message)).await {
                        break Disconnect::Transport(e.to_string());
                    }
                }
                frame = stream.next() => {
                    let frame = match frame {
                        None => break Disconnect::Client,
                        Some(Err(e)) => break Disconnect::Transport(e.to_string()),
                        Some(Ok(frame)) => frame,
                    };
                    match self.handle_frame(&joined, frame, &mut synced).await {
                        Ok(Step::Continue) => {}
                        Ok(Step::Reply(frame)) => {
                            if let Err(e) = sink.send(frame).await {
                                break Disconnect::Transport(e.to_string());
                            }
                        }
                        Ok(Step::Close) => break Disconnect::Client,
                        Err(e) => {
                            warn!(%session_id, %document_id, "closing session: {}", e);
                            let close = close_for(&e);
                            let _ = sink.send(Frame::Close(Some(close))).await;
                            break Disconnect::Protocol(e.to_string());
                        }
                    }
                }
            }
        };

        drain(&mut outbound);
        self.finish(joined, outcome)
    }

    async fn handle_frame(
        &self,
        joined: &JoinedSession,
        frame: Frame,
        synced: &mut bool,
    ) -> Result<Step, SyncError> {
        match frame {
            Frame::Binary(data) => match WireMessage::decode(&data)? {
                WireMessage::SyncStep1(state_vector) => {
                    let diff = joined.sync_step1(state_vector).await?;
                    if !*synced {
                        *synced = true;
                        info!(
                            session_id = %joined.id(),
                            document_id = joined.document_id(),
                            user_id = %joined.identity().user_id,
                            "synced"
                        );
                    }
                    Ok(Step::Reply(WireMessage::SyncStep2(diff).into()))
                }
                WireMessage::SyncStep2(update) | WireMessage::Update(update) => {
                    joined.apply_update(update).await?;
                    Ok(Step::Continue)
                }
                WireMessage::Awareness(payload) => {
                    joined.apply_awareness(payload);
                    Ok(Step::Continue)
                }
            },
            Frame::Text(text) => match serde_json::from_str::<ClientControlMessage>(&text) {
                Ok(ClientControlMessage::Ping) => Ok(Step::Reply((&ServerControlMessage::Pong).into())),
                Err(_) => {
                    debug!(session_id = %joined.id(), "ignoring text frame");
                    Ok(Step::Continue)
                }
            },
            Frame::Close(_) => Ok(Step::Close),
        }
    }

    fn finish(&self, joined: JoinedSession, outcome: Disconnect) -> Disconnect {
        info!(
            session_id = %joined.id(),
            document_id = joined.document_id(),
            user_id = %joined.identity().user_id,
            reason = ?outcome,
            "closed"
        );
        joined.leave();
        outcome
    }
}

enum Step {
    Continue,
    Reply(Frame),
    Close,
}

/// Close frame for a session-fatal error. Reasons stay short: control frames
/// carry at most 125 bytes.
fn close_for(error: &SyncError) -> CloseReason {
    match error {
        SyncError::Protocol(_) | SyncError::InvalidUpdate(_) | SyncError::InvalidStateVector(_) => {
            CloseReason::new(CloseReason::PROTOCOL_ERROR, "invalid message")
        }
        _ => CloseReason::new(CloseReason::INTERNAL_ERROR, "internal error"),
    }
}

fn drain(outbound: &mut mpsc::Receiver<Outbound>) {
    outbound.close();
    while outbound.try_recv().is_ok() {}
}
