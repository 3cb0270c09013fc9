//! Error types shared across the sync engine.

use thiserror::Error;

/// Errors produced while decoding frames from the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("unknown sync step {0}")]
    UnknownSyncStep(u64),
    #[error("truncated frame")]
    Truncated,
    #[error("varint overflow")]
    VarintOverflow,
}

/// Errors raised by a [`crate::persistence::PersistenceBridge`].
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Errors surfaced by room operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The delta could not be decoded or integrated into the replica.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    /// The state vector sent in a sync step could not be decoded.
    #[error("invalid state vector: {0}")]
    InvalidStateVector(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// The session is not joined to the room it addressed.
    #[error("session {0} is not joined to this room")]
    NotJoined(String),
    /// The room or registry task is gone (process shutting down).
    #[error("room for document {0} is unavailable")]
    RoomUnavailable(String),
}

impl SyncError {
    pub(crate) fn unavailable(document_id: &str) -> Self {
        SyncError::RoomUnavailable(document_id.to_string())
    }
}
