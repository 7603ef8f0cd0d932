//! Upstream version fetcher.
//!
//! Each channel publishes a small JSON metadata document whose `version`
//! field identifies the current patch.

use std::collections::HashMap;

use patchwatch_reconcile::{Channel, VersionPair};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

/// Errors fetching or decoding channel metadata.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{channel} metadata request failed: {source}")]
    Request {
        channel: Channel,
        #[source]
        source: reqwest::Error,
    },

    #[error("{channel} metadata request returned {status}: {body}")]
    Status {
        channel: Channel,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{channel} metadata is not a JSON string map: {source}")]
    Decode {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },
}

/// Fetches the current version of every channel.
#[derive(Debug, Clone)]
pub struct VersionFetcher {
    client: reqwest::Client,
    live_url: String,
    pbe_url: String,
}

impl VersionFetcher {
    /// Create a fetcher for the configured endpoints.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("patchwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self::with_client(
            client,
            config.live_url.clone(),
            config.pbe_url.clone(),
        ))
    }

    /// Create a fetcher around an existing client.
    pub fn with_client(client: reqwest::Client, live_url: String, pbe_url: String) -> Self {
        Self {
            client,
            live_url,
            pbe_url,
        }
    }

    fn url(&self, channel: Channel) -> &str {
        match channel {
            Channel::Live => &self.live_url,
            Channel::Pbe => &self.pbe_url,
        }
    }

    /// Fetch both channels. Either failure fails the whole fetch.
    pub async fn fetch_versions(&self) -> Result<VersionPair, FetchError> {
        let (live, pbe) = tokio::try_join!(
            self.fetch_channel(Channel::Live),
            self.fetch_channel(Channel::Pbe)
        )?;

        Ok(VersionPair { live, pbe })
    }

    /// Fetch the version of a single channel.
    pub async fn fetch_channel(&self, channel: Channel) -> Result<String, FetchError> {
        let url = self.url(channel);
        debug!(channel = channel.key(), url = %url, "Fetching channel metadata");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request { channel, source })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                channel,
                status,
                body,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|source| FetchError::Request { channel, source })?;

        parse_metadata(channel, &body)
    }
}

/// Extract the `version` field from a metadata document.
///
/// A document without `version` yields an empty string rather than an error.
/// Upstream has never been observed to omit it, and an empty stored value is
/// still a distinct value that a later run will replace.
pub fn parse_metadata(channel: Channel, body: &[u8]) -> Result<String, FetchError> {
    let mut doc: HashMap<String, String> =
        serde_json::from_slice(body).map_err(|source| FetchError::Decode { channel, source })?;

    match doc.remove("version") {
        Some(version) => Ok(version),
        None => {
            warn!(
                channel = channel.key(),
                keys = ?doc.keys().collect::<Vec<_>>(),
                "metadata has no version field; treating as empty"
            );
            Ok(String::new())
        }
    }
}
