//! Per-connection session state machine.
//!
//! A connection moves through three typed states:
//!
//! ```text
//! PendingConnection --authenticate--> AdmittedSession --join--> JoinedSession --drop--> (left)
//! ```
//!
//! Only a [`JoinedSession`] can send updates or awareness, so an update from an
//! unauthenticated or unjoined connection cannot be expressed. Dropping a
//! `JoinedSession` removes it from its room's broadcast set immediately.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{AuthenticationGate, HeaderBag, Identity, Rejection, validate_document_id};
use crate::error::SyncError;
use crate::protocol::{Frame, ServerControlMessage, WireMessage};
use crate::registry::{JoinAck, RoomRegistry};

pub type SessionId = Uuid;

/// Message queued by a room for delivery to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Wire(WireMessage),
    Control(ServerControlMessage),
}

impl From<Outbound> for Frame {
    fn from(message: Outbound) -> Self {
        match message {
            Outbound::Wire(wire) => Frame::from(wire),
            Outbound::Control(control) => Frame::from(&control),
        }
    }
}

/// Room-side record of a joined session. Never persisted.
#[derive(Debug)]
pub(crate) struct ClientSession {
    pub(crate) id: SessionId,
    pub(crate) identity: Identity,
    pub(crate) joined_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
    pub(crate) awareness: Option<Vec<u8>>,
    pub(crate) outbound: mpsc::Sender<Outbound>,
}

/// What a room needs to add a session to its broadcast set.
///
/// Only constructible through [`AdmittedSession::join`].
#[derive(Debug)]
pub struct SessionRegistration {
    pub(crate) id: SessionId,
    pub(crate) identity: Identity,
    pub(crate) outbound: mpsc::Sender<Outbound>,
}

impl SessionRegistration {
    pub(crate) fn into_client_session(self) -> ClientSession {
        let now = Utc::now();
        ClientSession {
            id: self.id,
            identity: self.identity,
            joined_at: now,
            last_activity: now,
            awareness: None,
            outbound: self.outbound,
        }
    }
}

// ==================== Pending ====================

/// A connection attempt that has not been authenticated yet.
#[derive(Debug)]
pub struct PendingConnection {
    document_id: String,
    headers: HeaderBag,
}

impl PendingConnection {
    pub fn new(document_id: impl Into<String>, headers: HeaderBag) -> Self {
        Self {
            document_id: document_id.into(),
            headers,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Run the gate to completion. Consumes the connection either way.
    pub async fn authenticate(
        self,
        gate: &dyn AuthenticationGate,
    ) -> Result<AdmittedSession, Rejection> {
        validate_document_id(&self.document_id)?;
        let identity = gate.admit(&self.document_id, &self.headers).await?;
        Ok(AdmittedSession {
            id: Uuid::new_v4(),
            document_id: self.document_id,
            identity,
        })
    }
}

// ==================== Admitted ====================

/// An authenticated session that has not joined its room yet.
#[derive(Debug)]
pub struct AdmittedSession {
    id: SessionId,
    document_id: String,
    identity: Identity,
}

impl AdmittedSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Join the document's room.
    ///
    /// Returns the joined handle, the join acknowledgement (server state vector
    /// and peers' awareness), and the receiver for room broadcasts. The
    /// receiver yields `None` once the room drops this session.
    pub async fn join(
        self,
        registry: &RoomRegistry,
    ) -> Result<(JoinedSession, JoinAck, mpsc::Receiver<Outbound>), SyncError> {
        let (tx, rx) = mpsc::channel(registry.outbound_capacity());
        let registration = SessionRegistration {
            id: self.id,
            identity: self.identity.clone(),
            outbound: tx,
        };
        let ack = registry.join(&self.document_id, registration).await?;
        let joined = JoinedSession {
            id: self.id,
            document_id: self.document_id,
            identity: self.identity,
            registry: registry.clone(),
        };
        Ok((joined, ack, rx))
    }
}

// ==================== Joined ====================

/// A session that belongs to exactly one room.
#[derive(Debug)]
pub struct JoinedSession {
    id: SessionId,
    document_id: String,
    identity: Identity,
    registry: RoomRegistry,
}

impl JoinedSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Answer a peer's state vector with the updates it is missing.
    pub async fn sync_step1(&self, state_vector: Vec<u8>) -> Result<Vec<u8>, SyncError> {
        self.registry
            .sync_step1(&self.document_id, self.id, state_vector)
            .await
    }

    /// Merge a delta and broadcast it to the other sessions.
    pub async fn apply_update(&self, delta: Vec<u8>) -> Result<(), SyncError> {
        self.registry
            .apply_update(&self.document_id, self.id, delta)
            .await
    }

    pub fn apply_awareness(&self, payload: Vec<u8>) {
        self.registry
            .apply_awareness(&self.document_id, self.id, payload);
    }

    /// Leave the room. Equivalent to dropping the handle.
    pub fn leave(self) {}
}

impl Drop for JoinedSession {
    fn drop(&mut self) {
        self.registry.leave(&self.document_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AllowOnly(&'static str);

    #[async_trait]
    impl AuthenticationGate for AllowOnly {
        async fn admit(&self, document_id: &str, headers: &HeaderBag) -> Result<Identity, Rejection> {
            match headers.cookie("sid") {
                None => Err(Rejection::AuthFailed),
                Some(_) if document_id != self.0 => Err(Rejection::AccessDenied),
                Some(user) => Ok(Identity {
                    user_id: user.to_string(),
                    display_name: user.to_uppercase(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_authenticate_transitions() {
        let gate = AllowOnly("doc1");

        let admitted = PendingConnection::new("doc1", HeaderBag::from_pairs([("cookie", "sid=ann")]))
            .authenticate(&gate)
            .await
            .unwrap();
        assert_eq!(admitted.identity().user_id, "ann");
        assert_eq!(admitted.document_id(), "doc1");

        let denied = PendingConnection::new("doc2", HeaderBag::from_pairs([("cookie", "sid=ann")]))
            .authenticate(&gate)
            .await
            .unwrap_err();
        assert_eq!(denied, Rejection::AccessDenied);

        let anonymous = PendingConnection::new("doc1", HeaderBag::new())
            .authenticate(&gate)
            .await
            .unwrap_err();
        assert_eq!(anonymous, Rejection::AuthFailed);
    }

    #[tokio::test]
    async fn test_malformed_document_id_never_reaches_gate() {
        let gate = AllowOnly("bad id");
        let err = PendingConnection::new("bad id", HeaderBag::from_pairs([("cookie", "sid=ann")]))
            .authenticate(&gate)
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::NotFound);
    }
}
