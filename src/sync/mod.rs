//! Synchronizer module: fetch lifecycles over the cache store.
//!
//! # Synchronizer
//!
//! Fetches remote data on behalf of many independent consumers, caches it per key, serves
//! stale data while refreshing in the background, retries failed fetches with exponential
//! backoff, and cancels superseded fetches.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Synchronizer`] | Owns the store and the per-key fetch tasks |
//! | [`SynchronizerBuilder`] | Configuration, capacity and runtime selection |
//! | [`Subscription`] | Stream of [`SyncState`] for one key; close or drop to leave |
//! | [`SyncOptions`] | TTL, stale-while-revalidate, retry budget and backoff |
//! | [`SyncConfig`] | Defaults and capacity, loadable from YAML or JSON |
//! | [`Fetcher`] | The fetch-function seam, implemented for async closures |
//!
//! ## Per-key lifecycle
//!
//! - **Resolving**: a new subscription checks the store. A fresh hit is delivered and no
//!   fetch happens. A stale hit is delivered immediately (stale-while-revalidate) and a
//!   background fetch starts; otherwise the subscriber sees `loading` and a fetch starts.
//! - **Fetching**: exactly one task per key. Starting another cancels the running one first.
//!   Failed attempts are retried after `retry_base_delay * 2^attempt` until the attempt
//!   budget runs out.
//! - **Settled**: success writes through to the store and notifies every subscriber of the
//!   key; terminal failure notifies them of the error, alongside the last value (now stale)
//!   for subscribers with stale-while-revalidate enabled.
//!
//! Cancellation is cooperative and lands at the fetch future or the backoff sleep. A
//! cancelled task stops there: no store write, no notification, no error.
//!
//! ```rust,no_run
//! use swr_cache::{SyncOptions, Synchronizer};
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! # async fn demo() -> swr_cache::Result<()> {
//! let sync: Synchronizer<Vec<String>> = Synchronizer::new()?;
//! let options = SyncOptions::new().with_ttl(Duration::from_secs(60));
//!
//! let mut clients = sync.subscribe("clients", || async { anyhow::Ok(vec!["acme".to_string()]) }, options);
//! while let Some(state) = clients.next().await {
//!     if let Some(data) = &state.data {
//!         println!("{} clients (stale: {})", data.len(), state.stale);
//!     }
//!     if !state.loading {
//!         break;
//!     }
//! }
//! clients.close();
//! # Ok(())
//! # }
//! ```

mod fetcher;
mod options;
mod retry;
mod state;
mod subscription;
mod synchronizer;
mod task;

pub use fetcher::Fetcher;
pub use options::{SyncConfig, SyncOptions};
pub use state::SyncState;
pub use subscription::Subscription;
pub use synchronizer::{Synchronizer, SynchronizerBuilder};
