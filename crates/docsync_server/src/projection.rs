//! Projection of CRDT state into the JSON returned by the read API.

use docsync::{DocumentReplica, SyncError};
use serde_json::{Value, json};

/// Turns an encoded document state into display-ready JSON.
pub trait ContentProjector: Send + Sync + 'static {
    fn project(&self, state: &[u8]) -> Result<Value, SyncError>;
}

/// Projects one root text as `{"text": ...}`.
#[derive(Debug, Clone)]
pub struct TextProjector {
    root: String,
}

impl TextProjector {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for TextProjector {
    fn default() -> Self {
        Self::new(docsync::DEFAULT_TEXT_ROOT)
    }
}

impl ContentProjector for TextProjector {
    fn project(&self, state: &[u8]) -> Result<Value, SyncError> {
        let replica = DocumentReplica::from_state(state)?;
        Ok(json!({ "text": replica.text(&self.root) }))
    }
}
