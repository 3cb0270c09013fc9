//! # docsync
//!
//! Real-time collaborative document sync engine, built on [`yrs`].
//!
//! This crate provides:
//! - **Protocol**: y-sync binary frames and JSON control messages
//! - **Replica merge core**: per-document CRDT replicas with order-independent merging
//! - **Room registry**: one actor task per document, with debounced persistence
//! - **Sessions**: a typed `Pending -> Admitted -> Joined` connection lifecycle
//! - **Gateway**: a transport-agnostic session loop over any frame `Sink`/`Stream`
//! - **Hot reads**: the freshest known state of a document, live or durable
//!
//! Storage and authentication are traits ([`PersistenceBridge`],
//! [`AuthenticationGate`]) implemented by the embedding server.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod persistence;
pub mod protocol;
pub mod read;
pub mod registry;
pub mod replica;
pub mod session;

mod room;

#[cfg(test)]
mod test_utils;

pub use auth::{AccessGrant, AuthenticationGate, HeaderBag, Identity, Rejection};
pub use error::{PersistenceError, ProtocolError, SyncError};
pub use gateway::{ConnectionGateway, Disconnect};
pub use persistence::{MemoryPersistence, PersistedState, PersistenceBridge};
pub use protocol::{CloseReason, Frame, ServerControlMessage, WireMessage};
pub use read::{HotRead, HotStateReader, StateSource};
pub use registry::{FlushOutcome, RegistryConfig, RegistryStats, RoomRegistry};
pub use replica::{DEFAULT_TEXT_ROOT, DocumentReplica, project_text};
pub use session::{AdmittedSession, JoinedSession, PendingConnection, SessionId};
