//! Watcher configuration.
//!
//! Everything is env-driven; the CLI only overrides individual fields.

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use patchwatch_reconcile::DEFAULT_NAMESPACE;

/// Live channel metadata document.
pub const DEFAULT_LIVE_URL: &str = "https://raw.communitydragon.org/latest/content-metadata.json";

/// PBE channel metadata document.
pub const DEFAULT_PBE_URL: &str = "https://raw.communitydragon.org/pbe/content-metadata.json";

/// NATS server hosting the JetStream key-value bucket.
pub const DEFAULT_NATS_URL: &str = "tls://connect.ngs.global";

/// Upper bound on a single run.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// Which store implementation backs the channel keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// One JSON document per namespace.
    File,
    /// SQLite database shared by all namespaces.
    Sqlite,
    /// NATS JetStream key-value bucket named after the namespace.
    Nats,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            "nats" | "jetstream" => Ok(Self::Nats),
            other => bail!("unknown store backend '{other}' (expected 'file', 'sqlite' or 'nats')"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => bail!("unknown log format '{other}' (expected 'json' or 'pretty')"),
        }
    }
}

/// Watcher configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Live channel metadata URL.
    pub live_url: String,

    /// PBE channel metadata URL.
    pub pbe_url: String,

    /// Store implementation.
    pub store_backend: StoreBackend,

    /// Directory holding store files.
    pub store_path: PathBuf,

    /// Namespace (bucket) holding the `live` and `pbe` keys.
    pub store_namespace: String,

    /// NATS server URL (nats backend only).
    pub nats_url: String,

    /// NATS user credentials file (nats backend only).
    pub nats_creds: Option<PathBuf>,

    /// Deadline for a whole run.
    pub deadline: Duration,

    /// Bind address for event-triggered runs.
    pub listen_addr: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let live_url = lookup("PATCHWATCH_LIVE_URL").unwrap_or_else(|| DEFAULT_LIVE_URL.into());
        let pbe_url = lookup("PATCHWATCH_PBE_URL").unwrap_or_else(|| DEFAULT_PBE_URL.into());

        let store_backend = lookup("PATCHWATCH_STORE_BACKEND")
            .map(|v| v.parse())
            .transpose()
            .context("PATCHWATCH_STORE_BACKEND is invalid.")?
            .unwrap_or(StoreBackend::File);

        let store_path = lookup("PATCHWATCH_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));

        let store_namespace = lookup("PATCHWATCH_STORE_NAMESPACE")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if store_namespace.is_empty()
            || !store_namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            bail!("PATCHWATCH_STORE_NAMESPACE must be non-empty and contain only [A-Za-z0-9_-].");
        }

        let nats_url = lookup("PATCHWATCH_NATS_URL").unwrap_or_else(|| DEFAULT_NATS_URL.into());
        let nats_creds = lookup("PATCHWATCH_NATS_CREDS").map(PathBuf::from);

        let deadline = lookup("PATCHWATCH_DEADLINE_SECS")
            .map(|v| parse_deadline_secs(&v))
            .transpose()
            .context("PATCHWATCH_DEADLINE_SECS must be a positive integer (seconds).")?
            .unwrap_or(DEFAULT_DEADLINE);

        let listen_addr =
            lookup("PATCHWATCH_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let log_level = lookup("PATCHWATCH_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_format = lookup("PATCHWATCH_LOG_FORMAT")
            .map(|v| v.parse())
            .transpose()
            .context("PATCHWATCH_LOG_FORMAT is invalid.")?
            .unwrap_or(LogFormat::Json);

        Ok(Self {
            live_url,
            pbe_url,
            store_backend,
            store_path,
            store_namespace,
            nats_url,
            nats_creds,
            deadline,
            listen_addr,
            log_level,
            log_format,
        })
    }
}

/// Parse a deadline in whole seconds. Zero is rejected.
pub fn parse_deadline_secs(raw: &str) -> Result<Duration> {
    let secs: u64 = raw.trim().parse().context("not an integer")?;
    if secs == 0 {
        bail!("deadline must be at least one second");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.live_url, DEFAULT_LIVE_URL);
        assert_eq!(config.pbe_url, DEFAULT_PBE_URL);
        assert_eq!(config.store_backend, StoreBackend::File);
        assert_eq!(config.store_namespace, "patches");
        assert_eq!(config.deadline, Duration::from_secs(3600));
        assert_eq!(config.nats_url, DEFAULT_NATS_URL);
        assert_eq!(config.nats_creds, None);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PATCHWATCH_LIVE_URL", "http://127.0.0.1:9/live.json"),
            ("PATCHWATCH_STORE_BACKEND", "SQLite"),
            ("PATCHWATCH_STORE_NAMESPACE", "patches-staging"),
            ("PATCHWATCH_DEADLINE_SECS", "90"),
            ("PATCHWATCH_LOG_FORMAT", "pretty"),
        ]))
        .unwrap();

        assert_eq!(config.live_url, "http://127.0.0.1:9/live.json");
        assert_eq!(config.store_backend, StoreBackend::Sqlite);
        assert_eq!(config.store_namespace, "patches-staging");
        assert_eq!(config.deadline, Duration::from_secs(90));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_nats_backend() {
        let config = Config::from_lookup(lookup(&[
            ("PATCHWATCH_STORE_BACKEND", "nats"),
            ("PATCHWATCH_NATS_URL", "nats://127.0.0.1:4222"),
            ("PATCHWATCH_NATS_CREDS", "/etc/patchwatch/NGS-Default-CLI.creds"),
        ]))
        .unwrap();

        assert_eq!(config.store_backend, StoreBackend::Nats);
        assert_eq!(config.nats_url, "nats://127.0.0.1:4222");
        assert_eq!(
            config.nats_creds,
            Some(PathBuf::from("/etc/patchwatch/NGS-Default-CLI.creds"))
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("PATCHWATCH_DEADLINE_SECS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("PATCHWATCH_DEADLINE_SECS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("PATCHWATCH_STORE_BACKEND", "redis")])).is_err());
        assert!(Config::from_lookup(lookup(&[("PATCHWATCH_STORE_NAMESPACE", "../etc")])).is_err());
    }
}
