//! SQLite-backed store.
//!
//! A single `kv` table keyed by (namespace, key). Revisions are allocated per
//! namespace inside the writing transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use patchwatch_reconcile::{KvStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

fn sqlite_err(e: rusqlite::Error) -> StoreError {
    StoreError::Sqlite(e.to_string())
}

/// SQLite store scoped to one namespace.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    namespace: String,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P, namespace: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(sqlite_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(sqlite_err)?;

        Self::with_connection(conn, namespace)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(namespace: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        Self::with_connection(conn, namespace)
    }

    fn with_connection(conn: Connection, namespace: &str) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                revision INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )
        .map_err(sqlite_err)?;

        debug!(namespace, "SQLite store schema initialized");

        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(sqlite_err)
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(sqlite_err)?;

        let revision: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(revision), 0) + 1 FROM kv WHERE namespace = ?1",
                params![self.namespace],
                |row| row.get(0),
            )
            .map_err(sqlite_err)?;

        tx.execute(
            r#"
            INSERT INTO kv (namespace, key, value, revision, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                revision = excluded.revision,
                updated_at = excluded.updated_at
            "#,
            params![
                self.namespace,
                key,
                value,
                revision,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .map_err(sqlite_err)?;

        tx.commit().map_err(sqlite_err)?;

        u64::try_from(revision)
            .map_err(|_| StoreError::Corrupt(format!("negative revision {revision}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_store_get_put() {
        let store = SqliteStore::open_in_memory("patches").unwrap();

        assert_eq!(store.get("pbe").await.unwrap(), None);
        assert_eq!(store.put("pbe", "14.21").await.unwrap(), 1);
        assert_eq!(store.put("pbe", "14.22").await.unwrap(), 2);
        assert_eq!(store.get("pbe").await.unwrap().as_deref(), Some("14.22"));
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_and_scopes_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("patchwatch.db");

        {
            let store = SqliteStore::open(&path, "patches").unwrap();
            store.put("live", "14.20").await.unwrap();
        }

        let reopened = SqliteStore::open(&path, "patches").unwrap();
        assert_eq!(reopened.get("live").await.unwrap().as_deref(), Some("14.20"));
        assert_eq!(reopened.put("pbe", "14.21").await.unwrap(), 2);

        let other = SqliteStore::open(&path, "staging").unwrap();
        assert_eq!(other.get("live").await.unwrap(), None);
        assert_eq!(other.put("live", "1.0").await.unwrap(), 1);
    }
}
