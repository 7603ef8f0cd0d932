//! NATS JetStream key-value store.
//!
//! The bucket is named after the namespace and must already exist; it is
//! provisioned alongside the account, not by the watcher.

use std::path::Path;

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use patchwatch_reconcile::{KvStore, StoreError};
use tracing::{debug, info};

/// Connection name reported to the NATS server.
const CONNECTION_NAME: &str = "patchwatch";

fn unavailable(e: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// JetStream bucket handle.
pub struct NatsStore {
    bucket: kv::Store,
}

impl NatsStore {
    /// Connect to `url` and bind to an existing bucket.
    pub async fn connect(
        url: &str,
        creds: Option<&Path>,
        namespace: &str,
    ) -> Result<Self, StoreError> {
        let mut options = async_nats::ConnectOptions::new().name(CONNECTION_NAME);
        if let Some(path) = creds {
            options = options.credentials_file(path).await.map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to load NATS credentials {}: {e}",
                    path.display()
                ))
            })?;
        }

        let client = options.connect(url).await.map_err(unavailable)?;
        let bucket = jetstream::new(client)
            .get_key_value(namespace)
            .await
            .map_err(unavailable)?;

        info!(url, bucket = namespace, "Connected to NATS key-value bucket");
        Ok(Self { bucket })
    }
}

fn decode_value(key: &str, raw: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(raw.to_vec())
        .map_err(|_| StoreError::Corrupt(format!("value of '{key}' is not UTF-8")))
}

#[async_trait]
impl KvStore for NatsStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entry = self.bucket.get(key).await.map_err(unavailable)?;
        entry.map(|raw| decode_value(key, &raw)).transpose()
    }

    async fn put(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let revision = self
            .bucket
            .put(key, value.to_string().into())
            .await
            .map_err(unavailable)?;

        debug!(key, revision, "Wrote NATS key");
        Ok(revision)
    }
}
