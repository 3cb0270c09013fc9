//! Document room registry.
//!
//! [`RoomRegistry`] is a cheap, cloneable handle to a single coordinator task
//! that owns the map of document id to room. Callers only send messages
//! (`join`, `leave`, `apply_update`, `apply_awareness`, `flush`, ...); the map
//! itself is never exposed, so there is at most one room per document id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::SyncError;
use crate::persistence::PersistenceBridge;
use crate::room::{RoomCommand, RoomStats, spawn_room};
use crate::session::{SessionId, SessionRegistration};

pub use crate::room::{FlushOutcome, JoinAck, LiveSnapshot};

/// Default quiet window before a dirty replica is stored.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(30);

/// Default number of queued outbound messages per session.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Registry tunables.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Debounce window applied per document id.
    pub debounce: Duration,
    /// Per-session outbound queue size; a session that falls this far behind is dropped.
    pub outbound_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Aggregate counters across all resident rooms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_rooms: usize,
    pub active_sessions: usize,
    pub dirty_rooms: usize,
}

enum RegistryCommand {
    Route {
        document_id: String,
        command: RoomCommand,
    },
    /// Snapshot a room only if it is resident; never loads one.
    Peek {
        document_id: String,
        reply: oneshot::Sender<Option<LiveSnapshot>>,
    },
    FlushAll {
        reply: oneshot::Sender<Vec<(String, FlushOutcome)>>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}

/// Handle to the room coordinator.
#[derive(Debug, Clone)]
pub struct RoomRegistry {
    tx: mpsc::UnboundedSender<RegistryCommand>,
    outbound_capacity: usize,
}

impl std::fmt::Debug for RegistryCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryCommand::Route { document_id, .. } => write!(f, "Route({document_id})"),
            RegistryCommand::Peek { document_id, .. } => write!(f, "Peek({document_id})"),
            RegistryCommand::FlushAll { .. } => write!(f, "FlushAll"),
            RegistryCommand::Stats { .. } => write!(f, "Stats"),
        }
    }
}

impl RoomRegistry {
    /// Spawn the coordinator task. Must be called inside a Tokio runtime.
    pub fn new(persistence: Arc<dyn PersistenceBridge>, config: RegistryConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            rooms: HashMap::new(),
            persistence,
            debounce: config.debounce,
        };
        tokio::spawn(coordinator.run(rx));
        Self {
            tx,
            outbound_capacity: config.outbound_capacity.max(1),
        }
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    fn route(&self, document_id: &str, command: RoomCommand) -> Result<(), SyncError> {
        self.tx
            .send(RegistryCommand::Route {
                document_id: document_id.to_string(),
                command,
            })
            .map_err(|_| SyncError::unavailable(document_id))
    }

    /// Add a session to the document's room, loading the room on first touch.
    pub async fn join(
        &self,
        document_id: &str,
        registration: SessionRegistration,
    ) -> Result<JoinAck, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.route(
            document_id,
            RoomCommand::Join {
                registration,
                reply,
            },
        )?;
        rx.await.map_err(|_| SyncError::unavailable(document_id))
    }

    /// Remove a session from the document's broadcast set.
    pub fn leave(&self, document_id: &str, session_id: SessionId) {
        let _ = self.route(document_id, RoomCommand::Leave { session_id });
    }

    /// Diff the replica against a peer's state vector.
    pub async fn sync_step1(
        &self,
        document_id: &str,
        session_id: SessionId,
        state_vector: Vec<u8>,
    ) -> Result<Vec<u8>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.route(
            document_id,
            RoomCommand::SyncStep1 {
                session_id,
                state_vector,
                reply,
            },
        )?;
        rx.await.map_err(|_| SyncError::unavailable(document_id))?
    }

    /// Merge a delta from a joined session and broadcast it to the others.
    ///
    /// Resolves once the delta is merged, so acknowledged updates are visible
    /// to any later read of the same room.
    pub async fn apply_update(
        &self,
        document_id: &str,
        session_id: SessionId,
        delta: Vec<u8>,
    ) -> Result<(), SyncError> {
        let (reply, rx) = oneshot::channel();
        self.route(
            document_id,
            RoomCommand::Update {
                session_id,
                delta,
                reply,
            },
        )?;
        rx.await.map_err(|_| SyncError::unavailable(document_id))?
    }

    /// Record and broadcast a session's presence payload.
    pub fn apply_awareness(&self, document_id: &str, session_id: SessionId, payload: Vec<u8>) {
        let _ = self.route(
            document_id,
            RoomCommand::Awareness {
                session_id,
                payload,
            },
        );
    }

    /// Store the document now if it is dirty, without waiting for the timer.
    pub async fn flush(&self, document_id: &str) -> Result<FlushOutcome, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.route(document_id, RoomCommand::Flush { reply })?;
        rx.await.map_err(|_| SyncError::unavailable(document_id))
    }

    /// Flush every resident dirty room. Used on graceful shutdown.
    pub async fn flush_all(&self) -> Vec<(String, FlushOutcome)> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RegistryCommand::FlushAll { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Current state of a resident room, or `None` if the document is not loaded.
    pub async fn live_state(&self, document_id: &str) -> Option<LiveSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Peek {
                document_id: document_id.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn stats(&self) -> RegistryStats {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RegistryCommand::Stats { reply }).is_err() {
            return RegistryStats::default();
        }
        rx.await.unwrap_or_default()
    }
}

// ==================== Coordinator Task ====================

struct Coordinator {
    rooms: HashMap<String, mpsc::UnboundedSender<RoomCommand>>,
    persistence: Arc<dyn PersistenceBridge>,
    debounce: Duration,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RegistryCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                RegistryCommand::Route {
                    document_id,
                    command,
                } => self.route(document_id, command),
                RegistryCommand::Peek { document_id, reply } => {
                    self.peek(&document_id, reply);
                }
                RegistryCommand::FlushAll { reply } => self.flush_all(reply),
                RegistryCommand::Stats { reply } => self.stats(reply),
            }
        }
        // Dropping the room senders lets each room flush and stop.
        debug!("Room registry stopped with {} rooms", self.rooms.len());
    }

    fn route(&mut self, document_id: String, command: RoomCommand) {
        if let Some(room) = self.rooms.get(&document_id) {
            if let Err(mpsc::error::SendError(command)) = room.send(command) {
                // Room task ended unexpectedly; forget it so the next join reloads.
                self.rooms.remove(&document_id);
                command.reject_unloaded(&document_id);
            }
            return;
        }

        if !command.loads_room() {
            command.reject_unloaded(&document_id);
            return;
        }

        info!("Loading room for document: {}", document_id);
        let room = spawn_room(document_id.clone(), self.persistence.clone(), self.debounce);
        // A freshly spawned room cannot have closed its mailbox yet.
        let _ = room.send(command);
        self.rooms.insert(document_id, room);
    }

    fn peek(&self, document_id: &str, reply: oneshot::Sender<Option<LiveSnapshot>>) {
        let Some(room) = self.rooms.get(document_id) else {
            let _ = reply.send(None);
            return;
        };
        let (tx, rx) = oneshot::channel();
        if room.send(RoomCommand::Snapshot { reply: tx }).is_err() {
            let _ = reply.send(None);
            return;
        }
        tokio::spawn(async move {
            let _ = reply.send(rx.await.ok());
        });
    }

    fn flush_all(&self, reply: oneshot::Sender<Vec<(String, FlushOutcome)>>) {
        let pending: Vec<_> = self
            .rooms
            .iter()
            .filter_map(|(document_id, room)| {
                let (tx, rx) = oneshot::channel();
                room.send(RoomCommand::Flush { reply: tx })
                    .ok()
                    .map(|_| (document_id.clone(), rx))
            })
            .collect();
        tokio::spawn(async move {
            let mut outcomes = Vec::with_capacity(pending.len());
            for (document_id, rx) in pending {
                if let Ok(outcome) = rx.await {
                    outcomes.push((document_id, outcome));
                }
            }
            let _ = reply.send(outcomes);
        });
    }

    fn stats(&self, reply: oneshot::Sender<RegistryStats>) {
        let pending: Vec<oneshot::Receiver<RoomStats>> = self
            .rooms
            .values()
            .filter_map(|room| {
                let (tx, rx) = oneshot::channel();
                room.send(RoomCommand::Stats { reply: tx }).ok().map(|_| rx)
            })
            .collect();
        tokio::spawn(async move {
            let mut stats = RegistryStats::default();
            for rx in pending {
                if let Ok(room) = rx.await {
                    stats.active_rooms += 1;
                    stats.active_sessions += room.sessions;
                    if room.dirty {
                        stats.dirty_rooms += 1;
                    }
                }
            }
            let _ = reply.send(stats);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::persistence::MemoryPersistence;
    use crate::protocol::{ServerControlMessage, WireMessage};
    use crate::replica::{DEFAULT_TEXT_ROOT, project_text};
    use crate::session::Outbound;
    use crate::test_utils::Editor;
    use uuid::Uuid;

    const WINDOW: Duration = Duration::from_secs(30);

    fn registry(store: &MemoryPersistence, outbound_capacity: usize) -> RoomRegistry {
        RoomRegistry::new(
            Arc::new(store.clone()),
            RegistryConfig {
                debounce: WINDOW,
                outbound_capacity,
            },
        )
    }

    fn registration(
        user: &str,
        capacity: usize,
    ) -> (SessionId, SessionRegistration, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = Uuid::new_v4();
        let registration = SessionRegistration {
            id,
            identity: Identity {
                user_id: user.to_string(),
                display_name: user.to_string(),
            },
            outbound: tx,
        };
        (id, registration, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_within_window_coalesce_into_one_store() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (id, reg, _rx) = registration("ann", 16);
        registry.join("doc", reg).await.unwrap();

        let editor = Editor::new(1);
        for i in 0..5 {
            let delta = editor.insert(i, "x");
            registry.apply_update("doc", id, delta).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        // 25s after the first edit: the window has not elapsed.
        assert_eq!(store.store_calls(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.store_calls(), 1);
        let stored = store.get("doc").unwrap();
        assert_eq!(project_text(&stored, DEFAULT_TEXT_ROOT).unwrap(), "xxxxx");

        // No further edits, no further stores.
        tokio::time::sleep(WINDOW * 3).await;
        assert_eq!(store.store_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_is_not_extended_by_later_edits() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (id, reg, _rx) = registration("ann", 16);
        registry.join("doc", reg).await.unwrap();

        let editor = Editor::new(1);
        registry
            .apply_update("doc", id, editor.insert(0, "a"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(29)).await;
        registry
            .apply_update("doc", id, editor.insert(1, "b"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Fired at the original deadline and carried the later edit too.
        assert_eq!(store.store_calls(), 1);
        let stored = store.get("doc").unwrap();
        assert_eq!(project_text(&stored, DEFAULT_TEXT_ROOT).unwrap(), "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_does_not_cancel_pending_flush() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (id, reg, _rx) = registration("ann", 16);
        registry.join("doc", reg).await.unwrap();

        let editor = Editor::new(1);
        registry
            .apply_update("doc", id, editor.insert(0, "kept"))
            .await
            .unwrap();
        registry.leave("doc", id);

        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;
        assert_eq!(store.store_calls(), 1);
        assert_eq!(registry.stats().await.active_sessions, 0);
        assert_eq!(registry.stats().await.active_rooms, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_store_retries_only_after_next_edit() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (id, reg, _rx) = registration("ann", 16);
        registry.join("doc", reg).await.unwrap();
        let editor = Editor::new(1);

        store.set_fail_store(true);
        registry
            .apply_update("doc", id, editor.insert(0, "a"))
            .await
            .unwrap();
        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;
        assert_eq!(store.store_calls(), 1);
        assert_eq!(registry.stats().await.dirty_rooms, 1);

        store.set_fail_store(false);
        tokio::time::sleep(WINDOW * 4).await;
        assert_eq!(store.store_calls(), 1, "no retry without a new edit");

        registry
            .apply_update("doc", id, editor.insert(1, "b"))
            .await
            .unwrap();
        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;
        assert_eq!(store.store_calls(), 2);
        assert_eq!(registry.stats().await.dirty_rooms, 0);
        let stored = store.get("doc").unwrap();
        assert_eq!(project_text(&stored, DEFAULT_TEXT_ROOT).unwrap(), "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_joins_share_one_fetch() {
        let store = MemoryPersistence::new();
        let seed = Editor::new(9).insert(0, "seeded");
        store.insert("doc", seed);
        store.set_fetch_delay(Some(Duration::from_secs(2)));
        let registry = registry(&store, 16);

        let mut joins = Vec::new();
        for user in ["a", "b", "c"] {
            let registry = registry.clone();
            let (_, reg, rx) = registration(user, 16);
            joins.push(tokio::spawn(async move {
                let ack = registry.join("doc", reg).await.unwrap();
                (ack, rx)
            }));
        }
        let mut receivers = Vec::new();
        for join in joins {
            let (ack, rx) = join.await.unwrap();
            assert!(!ack.state_vector.is_empty());
            receivers.push(rx);
        }

        assert_eq!(store.fetch_calls(), 1);
        let live = registry.live_state("doc").await.unwrap();
        assert_eq!(live.session_count, 3);
        assert_eq!(project_text(&live.state, DEFAULT_TEXT_ROOT).unwrap(), "seeded");
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_empty_replica() {
        let store = MemoryPersistence::new();
        store.insert("doc", Editor::new(9).insert(0, "unreachable"));
        store.set_fail_fetch(true);
        let registry = registry(&store, 16);

        let (_, reg, _rx) = registration("ann", 16);
        registry.join("doc", reg).await.unwrap();
        let live = registry.live_state("doc").await.unwrap();
        assert_eq!(project_text(&live.state, DEFAULT_TEXT_ROOT).unwrap(), "");
        assert!(!live.dirty);
    }

    #[tokio::test]
    async fn test_update_broadcast_excludes_origin() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (a, reg_a, mut rx_a) = registration("ann", 16);
        let (_b, reg_b, mut rx_b) = registration("bob", 16);
        registry.join("doc", reg_a).await.unwrap();
        let ack = registry.join("doc", reg_b).await.unwrap();
        assert_eq!(ack.peer_count, 2);

        // ann is told bob joined
        match rx_a.recv().await.unwrap() {
            Outbound::Control(ServerControlMessage::PeerJoined { user_id, peer_count, .. }) => {
                assert_eq!(user_id, "bob");
                assert_eq!(peer_count, 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        let delta = Editor::new(1).insert(0, "hi");
        registry.apply_update("doc", a, delta.clone()).await.unwrap();
        assert_eq!(
            rx_b.recv().await.unwrap(),
            Outbound::Wire(WireMessage::Update(delta))
        );
        assert!(rx_a.try_recv().is_err(), "origin must not receive its own update");
    }

    #[tokio::test]
    async fn test_awareness_replayed_to_joiners_and_dropped_on_leave() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (a, reg_a, _rx_a) = registration("ann", 16);
        registry.join("doc", reg_a).await.unwrap();
        registry.apply_awareness("doc", a, vec![1, 2, 3]);

        let (_, reg_b, _rx_b) = registration("bob", 16);
        let ack = registry.join("doc", reg_b).await.unwrap();
        assert_eq!(ack.peer_awareness, vec![vec![1, 2, 3]]);

        registry.leave("doc", a);
        let (_, reg_c, _rx_c) = registration("cat", 16);
        let ack = registry.join("doc", reg_c).await.unwrap();
        assert!(ack.peer_awareness.is_empty());

        // awareness never dirties the replica
        assert_eq!(registry.stats().await.dirty_rooms, 0);
    }

    #[tokio::test]
    async fn test_invalid_update_is_reported_to_sender_only() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (a, reg_a, _rx_a) = registration("ann", 16);
        let (_b, reg_b, mut rx_b) = registration("bob", 16);
        registry.join("doc", reg_a).await.unwrap();
        registry.join("doc", reg_b).await.unwrap();

        let err = registry
            .apply_update("doc", a, vec![0xFF, 0xFF, 0xFF])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidUpdate(_)));
        assert!(rx_b.try_recv().is_err());
        assert_eq!(registry.stats().await.active_sessions, 2);
    }

    #[tokio::test]
    async fn test_update_from_unjoined_session_is_rejected() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let delta = Editor::new(1).insert(0, "x");

        let err = registry
            .apply_update("never-loaded", Uuid::new_v4(), delta.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotJoined(_)));
        // Rejection must not have loaded the room.
        assert_eq!(store.fetch_calls(), 0);

        let (_, reg, _rx) = registration("ann", 16);
        registry.join("doc", reg).await.unwrap();
        let err = registry
            .apply_update("doc", Uuid::new_v4(), delta)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotJoined(_)));
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 1);
        let (a, reg_a, _rx_a) = registration("ann", 64);
        let (_b, reg_b, mut rx_b) = registration("bob", 1);
        registry.join("doc", reg_a).await.unwrap();
        registry.join("doc", reg_b).await.unwrap();

        let editor = Editor::new(1);
        for i in 0..3 {
            registry
                .apply_update("doc", a, editor.insert(i, "z"))
                .await
                .unwrap();
        }

        assert_eq!(registry.stats().await.active_sessions, 1);
        // bob got the first update, then his channel closed.
        assert!(matches!(rx_b.recv().await, Some(Outbound::Wire(_))));
        assert!(rx_b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_flush_all_stores_dirty_rooms() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        for doc in ["one", "two"] {
            let (id, reg, _rx) = registration("ann", 16);
            registry.join(doc, reg).await.unwrap();
            registry
                .apply_update(doc, id, Editor::new(1).insert(0, doc))
                .await
                .unwrap();
        }
        let (_, reg, _rx) = registration("ann", 16);
        registry.join("clean", reg).await.unwrap();

        let mut outcomes = registry.flush_all().await;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], ("clean".to_string(), FlushOutcome::Clean));
        assert!(matches!(outcomes[1].1, FlushOutcome::Stored { .. }));
        assert!(matches!(outcomes[2].1, FlushOutcome::Stored { .. }));
        assert_eq!(store.store_calls(), 2);
    }

    #[tokio::test]
    async fn test_live_state_does_not_load_rooms() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        assert!(registry.live_state("cold").await.is_none());
        assert_eq!(store.fetch_calls(), 0);
        assert_eq!(registry.stats().await, RegistryStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_flush_stores_once_and_disarms_timer() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (id, reg, _rx) = registration("ann", 16);
        registry.join("doc", reg).await.unwrap();
        let editor = Editor::new(1);

        registry
            .apply_update("doc", id, editor.insert(0, "now"))
            .await
            .unwrap();
        let outcome = registry.flush("doc").await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Stored { bytes } if bytes > 0));
        assert_eq!(store.store_calls(), 1);
        assert_eq!(
            project_text(&store.get("doc").unwrap(), DEFAULT_TEXT_ROOT).unwrap(),
            "now"
        );

        // The deadline armed by the edit no longer fires.
        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;
        assert_eq!(store.store_calls(), 1);

        assert_eq!(registry.flush("doc").await.unwrap(), FlushOutcome::Clean);
        assert_eq!(registry.flush("cold").await.unwrap(), FlushOutcome::Clean);
        assert_eq!(store.store_calls(), 1);

        store.set_fail_store(true);
        registry
            .apply_update("doc", id, editor.insert(3, "!"))
            .await
            .unwrap();
        let outcome = registry.flush("doc").await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Failed(_)));
        assert_eq!(store.store_calls(), 2);
        assert_eq!(registry.stats().await.dirty_rooms, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_window_is_per_document() {
        let store = MemoryPersistence::new();
        let registry = registry(&store, 16);
        let (ann, reg, _ann_rx) = registration("ann", 16);
        registry.join("a", reg).await.unwrap();
        let (cid, reg, _cid_rx) = registration("cid", 16);
        registry.join("b", reg).await.unwrap();

        registry
            .apply_update("a", ann, Editor::new(1).insert(0, "first"))
            .await
            .unwrap();

        // A second session on "a" editing mid-window does not move its deadline.
        tokio::time::sleep(Duration::from_secs(10)).await;
        let (bob, reg, _bob_rx) = registration("bob", 16);
        registry.join("a", reg).await.unwrap();
        registry
            .apply_update("a", bob, Editor::new(2).insert(0, "second"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        registry
            .apply_update("b", cid, Editor::new(3).insert(0, "other"))
            .await
            .unwrap();

        // t=31s: only "a" has been stored.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(store.store_calls(), 1);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());

        // t=51s: "b" fires on its own schedule.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.store_calls(), 2);
        assert_eq!(
            project_text(&store.get("b").unwrap(), DEFAULT_TEXT_ROOT).unwrap(),
            "other"
        );
    }
}
