//! One actor task per document.
//!
//! The room task owns the document's replica, its joined sessions and its
//! debounce timer. Commands are processed one at a time from the room's
//! mailbox, so every mutation of a replica is serialized without a lock.
//! Commands that arrive while the initial fetch is in flight wait in the
//! mailbox until loading completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::persistence::PersistenceBridge;
use crate::protocol::{ServerControlMessage, WireMessage};
use crate::replica::DocumentReplica;
use crate::session::{ClientSession, Outbound, SessionId, SessionRegistration};

/// Lifecycle of a replica. A document with no room is `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleState {
    Loading,
    Active,
}

/// Acknowledgement returned to a session that joined a room.
#[derive(Debug, Clone)]
pub struct JoinAck {
    /// Server state vector, sent to the client as `SyncStep1`.
    pub state_vector: Vec<u8>,
    /// Current awareness payloads of the other sessions.
    pub peer_awareness: Vec<Vec<u8>>,
    /// Sessions in the room including the new one.
    pub peer_count: usize,
}

/// Point-in-time view of an active replica, for the hot-state read path.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub state: Vec<u8>,
    pub session_count: usize,
    pub dirty: bool,
}

/// Result of an explicit or scheduled flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to store.
    Clean,
    /// The current state was stored.
    Stored { bytes: usize },
    /// The store failed; the replica stays dirty until the next edit re-arms the timer.
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoomStats {
    pub sessions: usize,
    pub dirty: bool,
}

pub(crate) enum RoomCommand {
    Join {
        registration: SessionRegistration,
        reply: oneshot::Sender<JoinAck>,
    },
    Leave {
        session_id: SessionId,
    },
    SyncStep1 {
        session_id: SessionId,
        state_vector: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<u8>, SyncError>>,
    },
    Update {
        session_id: SessionId,
        delta: Vec<u8>,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Awareness {
        session_id: SessionId,
        payload: Vec<u8>,
    },
    Snapshot {
        reply: oneshot::Sender<LiveSnapshot>,
    },
    Flush {
        reply: oneshot::Sender<FlushOutcome>,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

impl RoomCommand {
    /// Whether this command may bring an unloaded document into memory.
    pub(crate) fn loads_room(&self) -> bool {
        matches!(self, RoomCommand::Join { .. })
    }

    /// Answer a command addressed to a document that has no room.
    pub(crate) fn reject_unloaded(self, document_id: &str) {
        match self {
            RoomCommand::SyncStep1 {
                session_id, reply, ..
            } => {
                let _ = reply.send(Err(SyncError::NotJoined(session_id.to_string())));
            }
            RoomCommand::Update {
                session_id, reply, ..
            } => {
                let _ = reply.send(Err(SyncError::NotJoined(session_id.to_string())));
            }
            RoomCommand::Flush { reply } => {
                let _ = reply.send(FlushOutcome::Clean);
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(RoomStats::default());
            }
            RoomCommand::Leave { .. } | RoomCommand::Awareness { .. } => {
                debug!("Ignoring command for unloaded document {}", document_id);
            }
            // Join and Snapshot are routed by the registry itself.
            RoomCommand::Join { .. } | RoomCommand::Snapshot { .. } => {}
        }
    }
}

/// Spawn the actor for one document and return its mailbox.
pub(crate) fn spawn_room(
    document_id: String,
    persistence: Arc<dyn PersistenceBridge>,
    debounce: Duration,
) -> mpsc::UnboundedSender<RoomCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    let room = Room {
        document_id,
        replica: DocumentReplica::new(),
        sessions: HashMap::new(),
        dirty: false,
        flush_deadline: None,
        debounce,
        persistence,
        state: LifecycleState::Loading,
    };
    tokio::spawn(room.run(rx));
    tx
}

struct Room {
    document_id: String,
    replica: DocumentReplica,
    sessions: HashMap<SessionId, ClientSession>,
    dirty: bool,
    /// Armed debounce deadline. Never pushed back once armed.
    flush_deadline: Option<Instant>,
    debounce: Duration,
    persistence: Arc<dyn PersistenceBridge>,
    state: LifecycleState,
}

impl Room {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
        self.load().await;

        loop {
            let deadline = self.flush_deadline;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = wait_until(deadline) => {
                    self.flush_deadline = None;
                    self.flush().await;
                }
            }
        }

        // Registry gone: the process is shutting down.
        if self.dirty {
            self.flush().await;
        }
        debug!("Room task for {} stopped", self.document_id);
    }

    async fn load(&mut self) {
        debug_assert_eq!(self.state, LifecycleState::Loading);
        match self.persistence.fetch(&self.document_id).await {
            Ok(Some(row)) => match DocumentReplica::from_state(&row.state) {
                Ok(replica) => {
                    debug!(
                        "Loaded document {} ({} bytes)",
                        self.document_id,
                        row.state.len()
                    );
                    self.replica = replica;
                }
                Err(e) => {
                    error!(
                        "Stored state for {} is unreadable, starting empty: {}",
                        self.document_id, e
                    );
                }
            },
            Ok(None) => {
                debug!("No persisted state for document {}", self.document_id);
            }
            Err(e) => {
                warn!(
                    "Failed to fetch document {}, starting empty: {}",
                    self.document_id, e
                );
            }
        }
        self.state = LifecycleState::Active;
        info!("Room active for document: {}", self.document_id);
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                registration,
                reply,
            } => {
                let ack = self.join(registration);
                let _ = reply.send(ack);
            }
            RoomCommand::Leave { session_id } => self.leave(session_id),
            RoomCommand::SyncStep1 {
                session_id,
                state_vector,
                reply,
            } => {
                let result = self
                    .touch(session_id)
                    .and_then(|_| self.replica.encode_diff(&state_vector));
                let _ = reply.send(result);
            }
            RoomCommand::Update {
                session_id,
                delta,
                reply,
            } => {
                let result = self.apply_update(session_id, delta);
                let _ = reply.send(result);
            }
            RoomCommand::Awareness {
                session_id,
                payload,
            } => self.apply_awareness(session_id, payload),
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(LiveSnapshot {
                    state: self.replica.encode_state(),
                    session_count: self.sessions.len(),
                    dirty: self.dirty,
                });
            }
            RoomCommand::Flush { reply } => {
                self.flush_deadline = None;
                let outcome = self.flush().await;
                let _ = reply.send(outcome);
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(RoomStats {
                    sessions: self.sessions.len(),
                    dirty: self.dirty,
                });
            }
        }
    }

    fn join(&mut self, registration: SessionRegistration) -> JoinAck {
        let session = registration.into_client_session();
        let peer_awareness = self
            .sessions
            .values()
            .filter(|s| s.id != session.id)
            .filter_map(|s| s.awareness.clone())
            .collect();

        let joined = ServerControlMessage::PeerJoined {
            session_id: session.id.to_string(),
            user_id: session.identity.user_id.clone(),
            display_name: session.identity.display_name.clone(),
            peer_count: self.sessions.len() + 1,
        };
        let session_id = session.id;
        self.sessions.insert(session_id, session);
        self.broadcast(Outbound::Control(joined), Some(session_id));

        JoinAck {
            state_vector: self.replica.state_vector(),
            peer_awareness,
            peer_count: self.sessions.len(),
        }
    }

    /// Remove a session from the broadcast set. Any armed flush stays armed.
    fn leave(&mut self, session_id: SessionId) {
        let Some(session) = self.sessions.remove(&session_id) else {
            return;
        };
        debug!(
            "Session {} left {} after {}s",
            session_id,
            self.document_id,
            (Utc::now() - session.joined_at).num_seconds()
        );
        let left = ServerControlMessage::PeerLeft {
            session_id: session_id.to_string(),
            user_id: session.identity.user_id,
            peer_count: self.sessions.len(),
        };
        self.broadcast(Outbound::Control(left), None);
    }

    fn touch(&mut self, session_id: SessionId) -> Result<(), SyncError> {
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| SyncError::NotJoined(session_id.to_string()))?;
        session.last_activity = Utc::now();
        Ok(())
    }

    fn apply_update(&mut self, session_id: SessionId, delta: Vec<u8>) -> Result<(), SyncError> {
        self.touch(session_id)?;
        self.replica.apply_update(&delta)?;
        self.mark_dirty();
        self.broadcast(Outbound::Wire(WireMessage::Update(delta)), Some(session_id));
        Ok(())
    }

    fn apply_awareness(&mut self, session_id: SessionId, payload: Vec<u8>) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.last_activity = Utc::now();
        session.awareness = Some(payload.clone());
        self.broadcast(Outbound::Wire(WireMessage::Awareness(payload)), Some(session_id));
    }

    /// Mark dirty and arm the debounce timer if it is not already armed.
    fn mark_dirty(&mut self) {
        self.dirty = true;
        if self.flush_deadline.is_none() {
            self.flush_deadline = Some(Instant::now() + self.debounce);
        }
    }

    /// Store the replica's current state if dirty.
    ///
    /// The store is awaited inside the room task, so no merge can land between
    /// encoding the state and clearing the dirty flag.
    async fn flush(&mut self) -> FlushOutcome {
        if !self.dirty {
            return FlushOutcome::Clean;
        }
        let state = self.replica.encode_state();
        match self.persistence.store(&self.document_id, &state).await {
            Ok(()) => {
                self.dirty = false;
                info!(
                    "Stored document {} ({} bytes, {} sessions)",
                    self.document_id,
                    state.len(),
                    self.sessions.len()
                );
                FlushOutcome::Stored { bytes: state.len() }
            }
            Err(e) => {
                error!("Failed to store document {}: {}", self.document_id, e);
                FlushOutcome::Failed(e.to_string())
            }
        }
    }

    /// Queue a message for every joined session except `origin`.
    ///
    /// Sessions whose queue is full or closed are dropped from the room.
    fn broadcast(&mut self, message: Outbound, origin: Option<SessionId>) {
        let mut dropped = Vec::new();
        for session in self.sessions.values() {
            if Some(session.id) == origin {
                continue;
            }
            if let Err(e) = session.outbound.try_send(message.clone()) {
                warn!(
                    "Dropping session {} from {}: outbound queue {}",
                    session.id,
                    self.document_id,
                    match e {
                        mpsc::error::TrySendError::Full(_) => "full",
                        mpsc::error::TrySendError::Closed(_) => "closed",
                    }
                );
                dropped.push(session.id);
            }
        }

        for session_id in dropped {
            if let Some(session) = self.sessions.remove(&session_id) {
                let left = Outbound::Control(ServerControlMessage::PeerLeft {
                    session_id: session_id.to_string(),
                    user_id: session.identity.user_id,
                    peer_count: self.sessions.len(),
                });
                for peer in self.sessions.values() {
                    let _ = peer.outbound.try_send(left.clone());
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
