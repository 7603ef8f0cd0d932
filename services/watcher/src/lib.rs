//! patchwatch watcher
//!
//! Polls the live and PBE metadata documents, compares their versions with
//! the last recorded ones, and records changes in a durable key-value store.
//!
//! - [`fetch`]: upstream metadata fetcher
//! - [`store`]: file and SQLite store backends
//! - [`runner`]: one deadline-bounded fetch-then-reconcile run
//! - [`api`]: HTTP trigger for event-driven runs

pub mod api;
pub mod config;
pub mod fetch;
pub mod runner;
pub mod store;

pub use config::Config;
pub use fetch::{FetchError, VersionFetcher};
pub use runner::{RunError, RunSummary, Runner};
