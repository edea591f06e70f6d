//! In-memory cache store.

use super::key::CacheKey;
use super::stats::{AtomicStats, CacheStats};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Last known value for a key.
///
/// Handed out by value: callers get a clone, never a reference into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
    pub stale: bool,
}

impl<T> CacheEntry<T> {
    fn fresh(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            stale: false,
        }
    }

    /// Time since the value was last written.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Whether the entry has outlived `ttl`. Independent of the sticky `stale` flag.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }
}

/// Map from [`CacheKey`] to [`CacheEntry`].
///
/// Staleness is evaluated lazily at read time; there is no background sweep. Once a reader
/// observes an expired entry, or the key is invalidated, the entry stays stale until the next
/// `set`/`mutate` rewrites it.
///
/// Unbounded by default. With a capacity, inserting a new key into a full store evicts the
/// least-recently-used entry.
pub struct CacheStore<T> {
    entries: Mutex<LruCache<CacheKey, CacheEntry<T>>>,
    capacity: Option<NonZeroUsize>,
    stats: Arc<AtomicStats>,
}

impl<T: Clone> CacheStore<T> {
    pub fn new() -> Self {
        Self::from_parts(LruCache::unbounded(), None)
    }

    pub fn with_capacity(max_entries: NonZeroUsize) -> Self {
        Self::from_parts(LruCache::new(max_entries), Some(max_entries))
    }

    pub(crate) fn with_limit(max_entries: Option<NonZeroUsize>) -> Self {
        match max_entries {
            Some(cap) => Self::with_capacity(cap),
            None => Self::new(),
        }
    }

    fn from_parts(entries: LruCache<CacheKey, CacheEntry<T>>, capacity: Option<NonZeroUsize>) -> Self {
        Self {
            entries: Mutex::new(entries),
            capacity,
            stats: Arc::new(AtomicStats::new()),
        }
    }

    // The map holds no cross-entry invariants, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`, flagging the entry stale if it is older than `ttl`.
    pub fn get(&self, key: &CacheKey, ttl: Duration) -> Option<CacheEntry<T>> {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                if !entry.stale && entry.is_expired(ttl) {
                    entry.stale = true;
                }
                self.stats.record_hit();
                Some(entry.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Look up `key` without evaluating staleness or touching recency.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.lock().peek(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().contains(key)
    }

    /// Write a fresh value. The only way an entry goes from stale back to fresh, apart from
    /// [`mutate`](Self::mutate).
    pub fn set(&self, key: CacheKey, value: T) {
        self.put(key, value);
    }

    /// [`set`](Self::set), returning the key evicted to make room, if any.
    pub(crate) fn put(&self, key: CacheKey, value: T) -> Option<CacheKey> {
        let mut entries = self.lock();
        self.push_locked(&mut entries, key, CacheEntry::fresh(value))
    }

    /// Mark the entry stale, keeping its value servable. Returns whether the key was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        match self.lock().peek_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Replace the value with `updater(current)` and mark it fresh, bypassing any fetch.
    ///
    /// `updater` receives `None` when the key has no entry yet, and runs without the store
    /// locked, so it may read the store itself. A write landing while it runs is overwritten.
    /// Returns the new value.
    pub fn mutate<F>(&self, key: CacheKey, updater: F) -> T
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let current = self.peek(&key).map(|e| e.value);
        let value = updater(current.as_ref());
        self.put(key, value.clone());
        value
    }

    /// Drop the entry entirely.
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.lock().pop(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub(crate) fn stats_handle(&self) -> &Arc<AtomicStats> {
        &self.stats
    }

    fn push_locked(
        &self,
        entries: &mut LruCache<CacheKey, CacheEntry<T>>,
        key: CacheKey,
        entry: CacheEntry<T>,
    ) -> Option<CacheKey> {
        // `push` also returns the old pair when the key was already present; only a
        // different key coming back is an eviction.
        match entries.push(key.clone(), entry) {
            Some((evicted, _)) if evicted != key => {
                self.stats.record_eviction();
                debug!(key = %evicted, "evicted least-recently-used cache entry");
                Some(evicted)
            }
            _ => None,
        }
    }
}

impl<T: Clone> Default for CacheStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
