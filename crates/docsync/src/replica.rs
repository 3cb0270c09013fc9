//! In-memory CRDT replica for a single document.
//!
//! `DocumentReplica` wraps a `yrs::Doc` and exposes only the operations the
//! room needs: merge a delta, encode state, and diff against a peer's state
//! vector. Merging is commutative, associative and idempotent, so updates may
//! arrive in any order and more than once.

use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};

use crate::error::SyncError;

/// Name of the root text used by the default content projection.
pub const DEFAULT_TEXT_ROOT: &str = "content";

pub struct DocumentReplica {
    doc: Doc,
}

impl DocumentReplica {
    /// Create an empty replica.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Create a replica initialized from a persisted state blob.
    ///
    /// A blob that cannot be decoded is rejected rather than silently
    /// replaced, so the caller decides how to degrade.
    pub fn from_state(state: &[u8]) -> Result<Self, SyncError> {
        let replica = Self::new();
        if !state.is_empty() {
            replica.apply_update(state)?;
        }
        Ok(replica)
    }

    /// Merge a v1-encoded update into the replica.
    pub fn apply_update(&self, delta: &[u8]) -> Result<(), SyncError> {
        let update =
            Update::decode_v1(delta).map_err(|e| SyncError::InvalidUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| SyncError::InvalidUpdate(e.to_string()))
    }

    /// Encode the full current state as a single v1 update.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Encode the current state vector.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Encode everything a peer with the given state vector is missing.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, SyncError> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| SyncError::InvalidStateVector(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Read a root-level text type as a string.
    pub fn text(&self, root: &str) -> String {
        let text = self.doc.get_or_insert_text(root);
        let txn = self.doc.transact();
        text.get_string(&txn)
    }
}

impl Default for DocumentReplica {
    fn default() -> Self {
        Self::new()
    }
}

/// Project a state blob's root text without keeping a replica around.
pub fn project_text(state: &[u8], root: &str) -> Result<String, SyncError> {
    Ok(DocumentReplica::from_state(state)?.text(root))
}
