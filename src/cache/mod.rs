//! Cache store module: the in-memory source of truth for "what do we currently know".
//!
//! # Cache Store
//!
//! A pure data structure with no I/O. Every key maps to the last successfully fetched (or
//! locally mutated) value, the instant it was written, and a staleness flag.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | Key to entry map with lazy staleness and optional LRU bound |
//! | [`CacheEntry`] | Value, write instant and stale flag |
//! | [`CacheKey`] | Opaque key for one logical resource |
//! | [`QueryKey`] | Builds stable keys from a resource name and query parameters |
//! | [`CacheStats`] | Hit/miss/eviction and fetch counters |
//!
//! ## Staleness
//!
//! Staleness is computed when an entry is read, from its write instant and the reader's TTL.
//! [`CacheStore::invalidate`] sets the flag explicitly while keeping the value, so the last
//! known data stays servable while a refresh is pending. Only [`CacheStore::set`] and
//! [`CacheStore::mutate`] clear it.
//!
//! ```rust
//! use swr_cache::cache::{CacheKey, CacheStore};
//! use std::time::Duration;
//!
//! let store = CacheStore::new();
//! let key = CacheKey::from("clients");
//! store.set(key.clone(), vec!["acme"]);
//! store.invalidate(&key);
//!
//! let entry = store.get(&key, Duration::from_secs(300)).unwrap();
//! assert!(entry.stale);
//! assert_eq!(entry.value, vec!["acme"]);
//! ```

mod key;
mod stats;
mod store;

pub use key::{CacheKey, QueryKey};
pub use stats::CacheStats;
pub(crate) use stats::AtomicStats;
pub use store::{CacheEntry, CacheStore};
