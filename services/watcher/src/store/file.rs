//! JSON file store.
//!
//! One document per namespace at `<dir>/<namespace>.json`. Every write
//! rewrites the document via temp file + rename so readers never observe a
//! partially written file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchwatch_reconcile::{KvStore, StoreError};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Document format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct NamespaceDoc {
    version: u32,
    /// Last revision handed out in this namespace.
    revision: u64,
    entries: BTreeMap<String, Entry>,
}

impl Default for NamespaceDoc {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            revision: 0,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    revision: u64,
    updated_at: DateTime<Utc>,
}

/// File-backed store for a single namespace.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a store for `namespace` under `dir`. Nothing touches the disk
    /// until the first read or write.
    pub fn new(dir: impl AsRef<Path>, namespace: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{namespace}.json")),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the namespace document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<NamespaceDoc, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No store file yet");
                return Ok(NamespaceDoc::default());
            }
            Err(e) => return Err(e.into()),
        };
        let doc: NamespaceDoc = serde_json::from_str(&content).map_err(|e| {
            StoreError::Corrupt(format!("{}: {e}", self.path.display()))
        })?;

        if doc.version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "{}: unsupported format version {} (expected {FORMAT_VERSION})",
                self.path.display(),
                doc.version
            )));
        }

        Ok(doc)
    }

    async fn save(&self, doc: &NamespaceDoc) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let content =
            serde_json::to_string_pretty(doc).map_err(|e| StoreError::Serde(e.to_string()))?;

        if let Err(e) = fs::write(&tmp_path, content).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            warn!(path = %tmp_path.display(), error = %e, "Rename failed, removing temp file");
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(
            path = %self.path.display(),
            revision = doc.revision,
            key_count = doc.entries.len(),
            "Saved store file"
        );

        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let doc = self.load().await?;
        Ok(doc.entries.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut doc = self.load().await?;
        doc.revision += 1;
        let revision = doc.revision;
        doc.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                revision,
                updated_at: Utc::now(),
            },
        );

        self.save(&doc).await?;
        Ok(revision)
    }
}
