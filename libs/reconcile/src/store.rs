//! Key-value store interface and an in-memory implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from key-value store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable key-value store holding the last observed version per channel.
///
/// Implementations are handed to the reconciler already opened; loading
/// credentials or creating files is the caller's business.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key and return the new store revision.
    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<String, String>,
    revision: u64,
    writes: Vec<(String, String)>,
    fail_reads: BTreeSet<String>,
    fail_writes: BTreeSet<String>,
}

/// In-memory store for tests and dry runs.
///
/// Records every successful write and can be told to fail reads or writes
/// for specific keys.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with entries.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for (k, v) in entries {
                inner.entries.insert(k.into(), v.into());
            }
        }
        store
    }

    /// Make every subsequent read of `key` fail.
    pub fn fail_reads_for(&self, key: &str) {
        self.lock().fail_reads.insert(key.to_string());
    }

    /// Make every subsequent write of `key` fail.
    pub fn fail_writes_for(&self, key: &str) {
        self.lock().fail_writes.insert(key.to_string());
    }

    /// Current value of a key, bypassing failure injection.
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().entries.get(key).cloned()
    }

    /// All successful writes in order.
    pub fn writes(&self) -> Vec<(String, String)> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A panic while holding the lock leaves the map intact.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock();
        if inner.fail_reads.contains(key) {
            return Err(StoreError::Unavailable(format!("read of {key} refused")));
        }
        Ok(inner.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        if inner.fail_writes.contains(key) {
            return Err(StoreError::Unavailable(format!("write of {key} refused")));
        }
        inner.entries.insert(key.to_string(), value.to_string());
        inner.writes.push((key.to_string(), value.to_string()));
        inner.revision += 1;
        Ok(inner.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_revisions_increase() {
        let store = MemoryStore::new();

        assert_eq!(store.get("live").await.unwrap(), None);
        assert_eq!(store.put("live", "14.1").await.unwrap(), 1);
        assert_eq!(store.put("pbe", "14.2").await.unwrap(), 2);
        assert_eq!(store.get("live").await.unwrap().as_deref(), Some("14.1"));
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryStore::with_entries([("live", "1.0")]);
        store.fail_reads_for("live");
        store.fail_writes_for("pbe");

        assert!(store.get("live").await.is_err());
        assert!(store.put("pbe", "2.0").await.is_err());
        assert_eq!(store.value("live").as_deref(), Some("1.0"));
        assert!(store.writes().is_empty());
    }
}
