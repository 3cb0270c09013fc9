//! SQLite-backed persistence bridge.

use std::sync::Arc;

use async_trait::async_trait;
use docsync::{PersistedState, PersistenceBridge, PersistenceError};

use crate::db::DocRepo;

/// Stores document state in the `document_states` table.
///
/// Repository calls are synchronous, so they run on the blocking pool.
#[derive(Clone)]
pub struct SqlitePersistence {
    repo: Arc<DocRepo>,
}

impl SqlitePersistence {
    pub fn new(repo: Arc<DocRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PersistenceBridge for SqlitePersistence {
    async fn fetch(&self, document_id: &str) -> Result<Option<PersistedState>, PersistenceError> {
        let repo = self.repo.clone();
        let document_id = document_id.to_string();
        let row = tokio::task::spawn_blocking(move || repo.load_document_state(&document_id))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))?
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        Ok(row.map(|row| PersistedState {
            state: row.state,
            updated_at: row.updated_at,
        }))
    }

    async fn store(&self, document_id: &str, state: &[u8]) -> Result<(), PersistenceError> {
        let repo = self.repo.clone();
        let document_id = document_id.to_string();
        let state = state.to_vec();
        tokio::task::spawn_blocking(move || repo.save_document_state(&document_id, &state))
            .await
            .map_err(|e| PersistenceError::Task(e.to_string()))?
            .map_err(|e| PersistenceError::Backend(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use rusqlite::Connection;

    #[tokio::test]
    async fn test_store_and_fetch_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("state.db")).unwrap();
        init_database(&conn).unwrap();
        let bridge = SqlitePersistence::new(Arc::new(DocRepo::new(conn)));

        assert!(bridge.fetch("doc").await.unwrap().is_none());
        bridge.store("doc", &[9, 8, 7]).await.unwrap();
        let row = bridge.fetch("doc").await.unwrap().unwrap();
        assert_eq!(row.state, vec![9, 8, 7]);
    }
}
