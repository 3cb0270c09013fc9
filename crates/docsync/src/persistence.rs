//! Durable fetch/store of one opaque state blob per document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PersistenceError;

/// A durable row: the document's last stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    pub state: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// Storage backend used by rooms and the hot-state reader.
///
/// `fetch` returns `Ok(None)` when the document has never been stored.
#[async_trait]
pub trait PersistenceBridge: Send + Sync + 'static {
    async fn fetch(&self, document_id: &str) -> Result<Option<PersistedState>, PersistenceError>;

    async fn store(&self, document_id: &str, state: &[u8]) -> Result<(), PersistenceError>;
}

/// In-memory bridge for tests and local development.
///
/// Failures can be injected to exercise the degraded paths.
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rows: Mutex<HashMap<String, PersistedState>>,
    store_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    fetch_delay: Mutex<Option<Duration>>,
    fail_fetch: AtomicBool,
    fail_store: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row as if it had been stored earlier.
    pub fn insert(&self, document_id: &str, state: Vec<u8>) {
        let mut rows = self.inner.rows.lock().unwrap();
        rows.insert(
            document_id.to_string(),
            PersistedState {
                state,
                updated_at: Utc::now(),
            },
        );
    }

    /// Current stored bytes for a document.
    pub fn get(&self, document_id: &str) -> Option<Vec<u8>> {
        let rows = self.inner.rows.lock().unwrap();
        rows.get(document_id).map(|row| row.state.clone())
    }

    /// Number of `store` calls attempted, successful or not.
    pub fn store_calls(&self) -> usize {
        self.inner.store_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls attempted.
    pub fn fetch_calls(&self) -> usize {
        self.inner.fetch_calls.load(Ordering::SeqCst)
    }

    /// Make every fetch take this long, to hold rooms in the loading state.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.inner.fetch_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.inner.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_store(&self, fail: bool) {
        self.inner.fail_store.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceBridge for MemoryPersistence {
    async fn fetch(&self, document_id: &str) -> Result<Option<PersistedState>, PersistenceError> {
        self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.inner.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.fail_fetch.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("injected fetch failure".into()));
        }
        let rows = self.inner.rows.lock().unwrap();
        Ok(rows.get(document_id).cloned())
    }

    async fn store(&self, document_id: &str, state: &[u8]) -> Result<(), PersistenceError> {
        self.inner.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_store.load(Ordering::SeqCst) {
            return Err(PersistenceError::Backend("injected store failure".into()));
        }
        self.insert(document_id, state.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_missing_is_empty_sentinel() {
        let store = MemoryPersistence::new();
        assert!(store.fetch("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_then_fetch() {
        let store = MemoryPersistence::new();
        store.store("doc", &[1, 2, 3]).await.unwrap();
        let row = store.fetch("doc").await.unwrap().unwrap();
        assert_eq!(row.state, vec![1, 2, 3]);
        assert_eq!(store.store_calls(), 1);
    }

    #[tokio::test]
    async fn test_injected_store_failure_keeps_previous_row() {
        let store = MemoryPersistence::new();
        store.store("doc", &[1]).await.unwrap();
        store.set_fail_store(true);
        assert!(store.store("doc", &[2]).await.is_err());
        assert_eq!(store.get("doc"), Some(vec![1]));
        assert_eq!(store.store_calls(), 2);
    }
}
