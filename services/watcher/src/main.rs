//! patchwatch
//!
//! Detects new live and PBE patch versions and records them in a durable
//! key-value store.
//!
//! - `run`: one deadline-bounded run, for cron-style timers
//! - `serve`: HTTP trigger, for event-driven schedulers
//! - `seed`: provision the channel keys before the first run
//! - `show`: print the stored versions

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patchwatch_reconcile::{Channel, VersionPair};
use patchwatch_watcher::{
    api::{self, ApiState},
    config::{parse_deadline_secs, Config, LogFormat},
    store::{self, KvStore},
    RunError, Runner, VersionFetcher,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "patchwatch", version, about = "Live/PBE patch version watcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run once and exit; exits non-zero if the run fails.
    Run {
        /// Override the run deadline (seconds, at least 1).
        #[arg(long, value_parser = parse_deadline_secs)]
        deadline_secs: Option<Duration>,

        /// Print the run summary as JSON instead of notice lines.
        #[arg(long)]
        json: bool,
    },

    /// Listen for run requests (POST /v1/run).
    Serve {
        /// Override the listen address.
        #[arg(long)]
        listen_addr: Option<String>,
    },

    /// Create the channel keys. Fetches upstream values unless both are given.
    Seed {
        #[arg(long)]
        live: Option<String>,

        #[arg(long)]
        pbe: Option<String>,

        /// Overwrite keys that already exist.
        #[arg(long)]
        force: bool,
    },

    /// Print the stored versions.
    Show {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Logs go to stderr; stdout carries only notices and command output.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    init_tracing(&config);

    let result = match cli.command {
        Command::Run {
            deadline_secs,
            json,
        } => {
            if let Some(deadline) = deadline_secs {
                config.deadline = deadline;
            }
            run(&config, json).await
        }
        Command::Serve { listen_addr } => {
            if let Some(addr) = listen_addr {
                config.listen_addr = addr;
            }
            serve(&config).await
        }
        Command::Seed { live, pbe, force } => seed(&config, live, pbe, force).await,
        Command::Show { json } => show(&config, json).await,
    };

    if let Err(e) = result {
        error!(error = %format!("{e:#}"), "patchwatch failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

async fn build_runner(config: &Config) -> Result<Runner> {
    let fetcher = VersionFetcher::new(config)?;
    let store = store::open_store(config).await.context("Failed to open store")?;
    Ok(Runner::new(fetcher, store, config.deadline))
}

async fn run(config: &Config, json: bool) -> Result<()> {
    info!(
        live_url = %config.live_url,
        pbe_url = %config.pbe_url,
        namespace = %config.store_namespace,
        "Configuration loaded"
    );

    let summary = match build_runner(config).await?.run_once().await {
        Ok(summary) => summary,
        Err(e) => {
            // Channels written before the failure still get their notice.
            if let RunError::Reconcile(re) = &e {
                for outcome in re.completed() {
                    println!("{outcome}");
                }
            }
            return Err(e.into());
        }
    };

    if json {
        let doc = serde_json::json!({
            "fresh": summary.fresh,
            "report": summary.report,
            "elapsed_ms": summary.elapsed.as_millis() as u64,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        for notice in summary.report.notices() {
            println!("{notice}");
        }
    }

    Ok(())
}

async fn serve(config: &Config) -> Result<()> {
    let app = api::create_router(ApiState::new(build_runner(config).await?));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for run requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Watcher shutdown complete");
    Ok(())
}

async fn seed(
    config: &Config,
    live: Option<String>,
    pbe: Option<String>,
    force: bool,
) -> Result<()> {
    let store = store::open_store(config).await.context("Failed to open store")?;

    let values = match (live, pbe) {
        (Some(live), Some(pbe)) => VersionPair::new(live, pbe),
        (live, pbe) => {
            let fetched = VersionFetcher::new(config)?
                .fetch_versions()
                .await
                .context("Failed to fetch upstream versions for seeding")?;
            VersionPair::new(
                live.unwrap_or(fetched.live),
                pbe.unwrap_or(fetched.pbe),
            )
        }
    };

    for channel in Channel::ALL {
        let key = channel.key();
        if !force && store.get(key).await?.is_some() {
            warn!(channel = key, "Key already exists, skipping (use --force)");
            continue;
        }

        let revision = store.put(key, values.get(channel)).await?;
        info!(channel = key, version = %values.get(channel), revision, "Seeded key");
        println!("{key} = {}", values.get(channel));
    }

    Ok(())
}

async fn show(config: &Config, json: bool) -> Result<()> {
    let store = store::open_store(config).await.context("Failed to open store")?;

    let mut stored = Vec::with_capacity(Channel::ALL.len());
    for channel in Channel::ALL {
        stored.push((channel, store.get(channel.key()).await?));
    }

    if json {
        let map: serde_json::Map<String, serde_json::Value> = stored
            .into_iter()
            .map(|(channel, value)| (channel.key().to_string(), value.into()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (channel, value) in stored {
            println!(
                "{:<4} {}",
                channel.label(),
                value.as_deref().unwrap_or("<missing>")
            );
        }
    }

    Ok(())
}
