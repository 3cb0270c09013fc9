//! Hot-state read path.
//!
//! Serves the freshest known state of a document without joining it: the
//! live replica when a room is resident and someone is editing, otherwise
//! whatever the persistence bridge last stored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::PersistenceError;
use crate::persistence::PersistenceBridge;
use crate::registry::RoomRegistry;

/// Where a [`HotRead`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StateSource {
    Live,
    Durable,
}

#[derive(Debug, Clone)]
pub struct HotRead {
    /// Full encoded document state. Empty if the document was never stored.
    pub state: Vec<u8>,
    pub source: StateSource,
    /// Time of the last successful store, for durable reads.
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct HotStateReader {
    registry: RoomRegistry,
    persistence: Arc<dyn PersistenceBridge>,
}

impl HotStateReader {
    pub fn new(registry: RoomRegistry, persistence: Arc<dyn PersistenceBridge>) -> Self {
        Self {
            registry,
            persistence,
        }
    }

    /// Read a document's current state.
    ///
    /// Never loads a room. A resident room with no joined sessions is read
    /// from the store, so a document nobody is editing always reflects its
    /// last durable state.
    pub async fn read(&self, document_id: &str) -> Result<HotRead, PersistenceError> {
        if let Some(snapshot) = self.registry.live_state(document_id).await
            && snapshot.session_count > 0
        {
            debug!(
                document_id,
                sessions = snapshot.session_count,
                dirty = snapshot.dirty,
                "serving live state"
            );
            return Ok(HotRead {
                state: snapshot.state,
                source: StateSource::Live,
                updated_at: None,
            });
        }

        let row = self.persistence.fetch(document_id).await?;
        debug!(document_id, stored = row.is_some(), "serving durable state");
        Ok(match row {
            Some(row) => HotRead {
                state: row.state,
                source: StateSource::Durable,
                updated_at: Some(row.updated_at),
            },
            None => HotRead {
                state: Vec::new(),
                source: StateSource::Durable,
                updated_at: None,
            },
        })
    }
}
