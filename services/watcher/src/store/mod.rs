//! Durable key-value store backends.
//!
//! Every backend keeps one namespace per watcher deployment. Keys must be
//! provisioned (see `patchwatch seed`) before the first run.

mod file;
mod nats;
mod sqlite;

use std::sync::Arc;

pub use file::FileStore;
pub use nats::NatsStore;
pub use patchwatch_reconcile::{KvStore, MemoryStore, StoreError};
pub use sqlite::SqliteStore;

use crate::config::{Config, StoreBackend};

/// Open the configured store backend.
pub async fn open_store(config: &Config) -> Result<Arc<dyn KvStore>, StoreError> {
    let store: Arc<dyn KvStore> = match config.store_backend {
        StoreBackend::File => Arc::new(FileStore::new(
            &config.store_path,
            &config.store_namespace,
        )),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(
            config.store_path.join("patchwatch.db"),
            &config.store_namespace,
        )?),
        StoreBackend::Nats => Arc::new(
            NatsStore::connect(
                &config.nats_url,
                config.nats_creds.as_deref(),
                &config.store_namespace,
            )
            .await?,
        ),
    };

    Ok(store)
}
