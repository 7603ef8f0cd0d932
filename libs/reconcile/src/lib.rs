//! Version reconciliation.
//!
//! Compares freshly fetched version identifiers for each release channel
//! against the values last recorded in a key-value store, and writes the
//! store only where they differ. Key concepts:
//!
//! - **Fresh state**: what the upstream metadata documents report right now.
//! - **Stored state**: what the previous run observed (one key per channel).
//! - **Outcome**: per channel, either unchanged or updated (with a revision).
//!
//! # Invariants
//!
//! - Both stored keys are read before anything is written
//! - A channel is written at most once per pass, and only when it changed
//! - Channels are written independently; a failed write is never rolled back

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

mod store;

pub use store::{KvStore, MemoryStore, StoreError};

/// Default namespace (bucket) holding the channel keys.
pub const DEFAULT_NAMESPACE: &str = "patches";

/// A tracked release channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Public release.
    Live,
    /// Public beta environment.
    Pbe,
}

impl Channel {
    /// Channels in reconciliation order.
    pub const ALL: [Channel; 2] = [Channel::Live, Channel::Pbe];

    /// Key used in the store.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Pbe => "pbe",
        }
    }

    /// Human-facing label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Live => "Live",
            Self::Pbe => "PBE",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Version identifiers for both channels, as observed in a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionPair {
    pub live: String,
    pub pbe: String,
}

impl VersionPair {
    pub fn new(live: impl Into<String>, pbe: impl Into<String>) -> Self {
        Self {
            live: live.into(),
            pbe: pbe.into(),
        }
    }

    /// Version for a channel.
    pub fn get(&self, channel: Channel) -> &str {
        match channel {
            Channel::Live => &self.live,
            Channel::Pbe => &self.pbe,
        }
    }
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Stored key missing or unreadable. Nothing was written.
    #[error("failed to read stored {channel} version: {source}")]
    StateRead {
        channel: Channel,
        #[source]
        source: ReadFailure,
    },

    /// Writing the new version failed. `completed` holds the outcomes of
    /// the channels that were reconciled anyway.
    #[error("failed to write {channel} version: {source}")]
    StateWrite {
        channel: Channel,
        #[source]
        source: StoreError,
        completed: Vec<ChannelOutcome>,
    },
}

impl ReconcileError {
    /// Channel the failure belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            Self::StateRead { channel, .. } | Self::StateWrite { channel, .. } => *channel,
        }
    }

    /// Outcomes that took effect before the pass failed.
    pub fn completed(&self) -> &[ChannelOutcome] {
        match self {
            Self::StateRead { .. } => &[],
            Self::StateWrite { completed, .. } => completed,
        }
    }
}

/// Why a stored value could not be read.
#[derive(Debug, Error)]
pub enum ReadFailure {
    /// The key has never been provisioned.
    #[error("key '{0}' not found")]
    Missing(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of reconciling one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelOutcome {
    /// Stored and fetched versions matched; nothing written.
    Unchanged { channel: Channel, version: String },

    /// A new version was written.
    Updated {
        channel: Channel,
        previous: String,
        current: String,
        revision: u64,
    },
}

impl ChannelOutcome {
    pub fn channel(&self) -> Channel {
        match self {
            Self::Unchanged { channel, .. } | Self::Updated { channel, .. } => *channel,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

/// The notice line for this outcome.
impl fmt::Display for ChannelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged { channel, .. } => write!(f, "no change ({channel})"),
            Self::Updated {
                channel, current, ..
            } => write!(f, "new version found ({channel}): {current}"),
        }
    }
}

/// Outcomes of a full pass, in channel order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl ReconcileReport {
    /// Number of store writes performed.
    pub fn writes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_updated()).count()
    }

    /// Notice lines in channel order.
    pub fn notices(&self) -> Vec<String> {
        self.outcomes.iter().map(ToString::to_string).collect()
    }
}

async fn read_stored(store: &dyn KvStore, channel: Channel) -> Result<String, ReconcileError> {
    let value = store
        .get(channel.key())
        .await
        .map_err(|e| ReconcileError::StateRead {
            channel,
            source: e.into(),
        })?;

    value.ok_or(ReconcileError::StateRead {
        channel,
        source: ReadFailure::Missing(channel.key()),
    })
}

async fn apply_channel(
    store: &dyn KvStore,
    channel: Channel,
    stored: &str,
    fresh: &str,
) -> Result<ChannelOutcome, StoreError> {
    if stored == fresh {
        debug!(channel = channel.key(), version = %fresh, "stored version is current");
        return Ok(ChannelOutcome::Unchanged {
            channel,
            version: fresh.to_string(),
        });
    }

    let revision = store.put(channel.key(), fresh).await?;

    Ok(ChannelOutcome::Updated {
        channel,
        previous: stored.to_string(),
        current: fresh.to_string(),
        revision,
    })
}

/// Reconcile freshly fetched versions against the store.
///
/// Reads every channel before writing any. Writes are attempted for every
/// changed channel even if an earlier one failed; the first write failure is
/// returned after all channels were tried, carrying the outcomes that did
/// take effect.
pub async fn reconcile(
    fresh: &VersionPair,
    store: &dyn KvStore,
) -> Result<ReconcileReport, ReconcileError> {
    let stored = VersionPair::new(
        read_stored(store, Channel::Live).await?,
        read_stored(store, Channel::Pbe).await?,
    );

    let mut outcomes = Vec::with_capacity(Channel::ALL.len());
    let mut first_failure = None;

    for channel in Channel::ALL {
        match apply_channel(store, channel, stored.get(channel), fresh.get(channel)).await {
            Ok(outcome) => {
                match &outcome {
                    ChannelOutcome::Updated {
                        previous,
                        current,
                        revision,
                        ..
                    } => info!(
                        channel = channel.key(),
                        previous = %previous,
                        current = %current,
                        revision,
                        "{outcome}"
                    ),
                    ChannelOutcome::Unchanged { version, .. } => {
                        info!(channel = channel.key(), version = %version, "{outcome}")
                    }
                }
                outcomes.push(outcome);
            }
            Err(source) => {
                error!(channel = channel.key(), error = %source, "version write failed");
                if first_failure.is_none() {
                    first_failure = Some((channel, source));
                }
            }
        }
    }

    match first_failure {
        Some((channel, source)) => Err(ReconcileError::StateWrite {
            channel,
            source,
            completed: outcomes,
        }),
        None => Ok(ReconcileReport { outcomes }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(live: &str, pbe: &str) -> MemoryStore {
        MemoryStore::with_entries([("live", live), ("pbe", pbe)])
    }

    #[tokio::test]
    async fn test_only_changed_channel_is_written() {
        let store = seeded("1.0", "2.0");
        let fresh = VersionPair::new("1.0", "2.1");

        let report = reconcile(&fresh, &store).await.unwrap();

        assert_eq!(store.writes(), vec![("pbe".to_string(), "2.1".to_string())]);
        assert_eq!(
            report.notices(),
            vec!["no change (Live)", "new version found (PBE): 2.1"]
        );
        assert_eq!(report.writes(), 1);
    }

    #[tokio::test]
    async fn test_no_writes_when_current() {
        let store = seeded("1.0", "2.0");
        let fresh = VersionPair::new("1.0", "2.0");

        let report = reconcile(&fresh, &store).await.unwrap();

        assert!(store.writes().is_empty());
        assert_eq!(report.writes(), 0);
        assert!(report.outcomes.iter().all(|o| !o.is_updated()));
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let store = seeded("1.0", "2.0");
        let fresh = VersionPair::new("1.1", "2.1");

        let first = reconcile(&fresh, &store).await.unwrap();
        let second = reconcile(&fresh, &store).await.unwrap();

        assert_eq!(first.writes(), 2);
        assert_eq!(second.writes(), 0);
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_live_key_aborts_before_pbe() {
        let store = MemoryStore::with_entries([("pbe", "2.0")]);
        // a pbe read would surface as a Store failure, not Missing("live")
        store.fail_reads_for("pbe");

        let err = reconcile(&VersionPair::new("1.0", "2.1"), &store)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::StateRead {
                channel: Channel::Live,
                source: ReadFailure::Missing("live"),
            }
        ));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_pbe_read_failure_prevents_live_write() {
        let store = seeded("1.0", "2.0");
        store.fail_reads_for("pbe");

        let err = reconcile(&VersionPair::new("1.1", "2.0"), &store)
            .await
            .unwrap_err();

        assert_eq!(err.channel(), Channel::Pbe);
        assert!(store.writes().is_empty());
        assert_eq!(store.value("live").as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn test_live_write_failure_still_writes_pbe() {
        let store = seeded("1.0", "2.0");
        store.fail_writes_for("live");

        let err = reconcile(&VersionPair::new("1.1", "2.1"), &store)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::StateWrite {
                channel: Channel::Live,
                ..
            }
        ));
        assert_eq!(store.value("live").as_deref(), Some("1.0"));
        assert_eq!(store.value("pbe").as_deref(), Some("2.1"));
        assert_eq!(
            err.completed(),
            &[ChannelOutcome::Updated {
                channel: Channel::Pbe,
                previous: "2.0".to_string(),
                current: "2.1".to_string(),
                revision: 1,
            }]
        );
        assert_eq!(err.completed()[0].to_string(), "new version found (PBE): 2.1");
    }

    #[tokio::test]
    async fn test_updated_outcome_carries_previous_and_revision() {
        let store = seeded("1.0", "2.0");

        let report = reconcile(&VersionPair::new("1.1", "2.0"), &store)
            .await
            .unwrap();

        assert_eq!(
            report.outcomes.first(),
            Some(&ChannelOutcome::Updated {
                channel: Channel::Live,
                previous: "1.0".to_string(),
                current: "1.1".to_string(),
                revision: 1,
            })
        );
    }

    #[tokio::test]
    async fn test_empty_fresh_version_is_written_like_any_other() {
        let store = seeded("1.0", "2.0");

        let report = reconcile(&VersionPair::new("", "2.0"), &store)
            .await
            .unwrap();

        assert_eq!(report.writes(), 1);
        assert_eq!(store.value("live").as_deref(), Some(""));
    }
}
