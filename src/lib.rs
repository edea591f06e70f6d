//! # swr-cache
//!
//! Resilient data synchronization cache: fetch remote data for many independent consumers,
//! cache it per logical key, serve stale data while refreshing in the background, retry
//! failed fetches with backoff, and cancel superseded fetches safely.
//!
//! ## Overview
//!
//! Two layers, built bottom-up:
//!
//! - **Cache store** ([`cache`]): key to last-known-value map with lazy, sticky staleness.
//!   No I/O.
//! - **Synchronizer** ([`sync`]): single-flight fetch tasks per key, retry with exponential
//!   backoff, stale-while-revalidate, and a stream of state notifications per subscription.
//!
//! The only external boundary is the fetch function: a re-invocable async operation that
//! yields a value or an error. Transport, authentication and record shape belong to it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swr_cache::{SyncOptions, Synchronizer};
//!
//! #[tokio::main]
//! async fn main() -> swr_cache::Result<()> {
//!     let sync: Synchronizer<Vec<String>> = Synchronizer::new()?;
//!
//!     let mut projects = sync.subscribe(
//!         "projects",
//!         || async { anyhow::Ok(vec!["website relaunch".to_string()]) },
//!         SyncOptions::default(),
//!     );
//!     let first = projects.next_state().await;
//!     assert!(first.map_or(false, |s| s.loading));
//!
//!     // After a local write, update the cache optimistically.
//!     sync.mutate("projects", |current| {
//!         let mut next = current.cloned().unwrap_or_default();
//!         next.push("brand refresh".to_string());
//!         next
//!     });
//!
//!     // Or force a round-trip.
//!     let latest = sync.refresh("projects").await?;
//!     println!("{} projects", latest.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Cache store, entries, keys and counters |
//! | [`sync`] | Synchronizer, subscriptions, options and the fetcher seam |
//! | [`error`] | Error types |
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events (fetch starts, retries, supersession, terminal
//! failures) and never installs a subscriber itself.

pub mod cache;
pub mod error;
pub mod sync;

pub use cache::{CacheEntry, CacheKey, CacheStats, CacheStore, QueryKey};
pub use error::{Error, ErrorContext, FetchError};
pub use sync::{
    Fetcher, Subscription, SyncConfig, SyncOptions, SyncState, Synchronizer, SynchronizerBuilder,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
