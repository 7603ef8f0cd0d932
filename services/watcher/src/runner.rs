//! A single watcher run: fetch both channels, then reconcile the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use patchwatch_reconcile::{reconcile, KvStore, ReconcileError, ReconcileReport, VersionPair};
use thiserror::Error;
use tracing::{error, info};

use crate::fetch::{FetchError, VersionFetcher};

/// Why a run failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("fetch phase failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("reconcile phase failed: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("run exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fresh: VersionPair,
    pub report: ReconcileReport,
    pub elapsed: Duration,
}

/// Runs fetch-then-reconcile against one store.
#[derive(Clone)]
pub struct Runner {
    fetcher: VersionFetcher,
    store: Arc<dyn KvStore>,
    deadline: Duration,
}

impl Runner {
    pub fn new(fetcher: VersionFetcher, store: Arc<dyn KvStore>, deadline: Duration) -> Self {
        Self {
            fetcher,
            store,
            deadline,
        }
    }

    /// Perform one run bounded by the configured deadline.
    pub async fn run_once(&self) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        info!(deadline_secs = self.deadline.as_secs(), "Starting run");

        let result = match tokio::time::timeout(self.deadline, self.fetch_and_reconcile()).await {
            Ok(result) => result,
            Err(_) => Err(RunError::DeadlineExceeded(self.deadline)),
        };

        match result {
            Ok((fresh, report)) => {
                let elapsed = started.elapsed();
                info!(
                    live = %fresh.live,
                    pbe = %fresh.pbe,
                    writes = report.writes(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Run complete"
                );
                Ok(RunSummary {
                    fresh,
                    report,
                    elapsed,
                })
            }
            Err(e) => {
                match &e {
                    RunError::Reconcile(re) => error!(
                        channel = re.channel().key(),
                        completed = re.completed().len(),
                        error = %e,
                        "Run failed"
                    ),
                    _ => error!(error = %e, "Run failed"),
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_reconcile(&self) -> Result<(VersionPair, ReconcileReport), RunError> {
        let fresh = self.fetcher.fetch_versions().await?;
        let report = reconcile(&fresh, self.store.as_ref()).await?;
        Ok((fresh, report))
    }
}
