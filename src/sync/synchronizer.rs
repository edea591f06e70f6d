//! Fetch orchestration on top of [`CacheStore`].

use super::fetcher::{Fetcher, SharedFetcher};
use super::options::{SyncConfig, SyncOptions};
use super::retry::{fetch_with_retry, Outcome};
use super::state::SyncState;
use super::subscription::Subscription;
use super::task::FetchTask;
use crate::cache::{CacheEntry, CacheKey, CacheStats, CacheStore};
use crate::error::FetchError;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

/// Builder for [`Synchronizer`].
pub struct SynchronizerBuilder<T> {
    config: SyncConfig,
    runtime: Option<Handle>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Default for SynchronizerBuilder<T> {
    fn default() -> Self {
        Self {
            config: SyncConfig::default(),
            runtime: None,
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SynchronizerBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizerBuilder")
            .field("config", &self.config)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl<T: Clone + Send + 'static> SynchronizerBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Options for keys that are refreshed or read before any subscription registers its own.
    pub fn with_defaults(mut self, defaults: SyncOptions) -> Self {
        self.config.defaults = defaults;
        self
    }

    pub fn with_max_entries(mut self, max_entries: NonZeroUsize) -> Self {
        self.config.max_entries = Some(max_entries);
        self
    }

    /// Runtime that fetch tasks are spawned on. Defaults to the runtime `build` is called in.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Synchronizer<T>> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| Error::Runtime {
                message: format!("synchronizer must be built inside a tokio runtime: {}", e),
            })?,
        };

        Ok(Synchronizer {
            shared: Arc::new(Shared {
                store: CacheStore::with_limit(self.config.max_entries),
                keys: Mutex::new(HashMap::new()),
                defaults: self.config.defaults,
                runtime,
                next_subscriber: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
            }),
        })
    }
}

/// Stale-while-revalidate synchronizer.
///
/// Owns a [`CacheStore`] and at most one in-flight fetch per key. Starting a new fetch for a
/// key (forced refresh, or a subscription that needs fresh data) cancels the previous one
/// first, and a cancelled fetch never writes to the store or notifies anyone. Keys are
/// independent and fetch concurrently.
///
/// A key's registration (fetcher and options) is kept while it has subscribers, a pending
/// refresh, a fetch in flight or a cached value. Once none of those remain, for instance
/// after the store evicts it, the key is forgotten and `refresh` reports it unknown.
///
/// Cheap to clone; clones share the same store and tasks.
pub struct Synchronizer<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Clone for Synchronizer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Synchronizer<T> {
    pub fn builder() -> SynchronizerBuilder<T> {
        SynchronizerBuilder::new()
    }

    /// Default configuration on the current tokio runtime.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Subscribe to `key`, fetching with `fetcher` as needed.
    ///
    /// The first notification is delivered before this returns:
    /// - fresh hit: the cached value, no fetch;
    /// - stale hit with stale-while-revalidate: the stale value, then a background fetch;
    /// - otherwise: a loading state, then a fetch.
    ///
    /// The fetcher and options also become the key's registration for
    /// [`refresh`](Self::refresh).
    pub fn subscribe<F>(
        &self,
        key: impl Into<CacheKey>,
        fetcher: F,
        options: SyncOptions,
    ) -> Subscription<T>
    where
        F: Fetcher<T> + 'static,
    {
        let key = key.into();
        let fetcher: SharedFetcher<T> = Arc::new(fetcher);
        let shared = &self.shared;
        let id = shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut keys = shared.lock_keys();
        let slot = keys
            .entry(key.clone())
            .or_insert_with(|| KeySlot::new(shared.defaults.clone()));
        slot.register(Arc::clone(&fetcher), options.clone());

        // The receiver is alive, so these sends cannot fail.
        let pending = match shared.store.get(&key, options.ttl) {
            Some(entry) if !entry.stale => {
                debug!(key = %key, "cache hit");
                let _ = tx.send(SyncState::fresh(entry.value));
                None
            }
            Some(entry) if options.stale_while_revalidate => {
                debug!(key = %key, "stale hit, revalidating in background");
                let _ = tx.send(SyncState::stale(entry.value));
                Some(shared.start_fetch(slot, &key, fetcher, options.clone()))
            }
            _ => {
                debug!(key = %key, "cache miss");
                let _ = tx.send(SyncState::loading());
                Some(shared.start_fetch(slot, &key, fetcher, options.clone()))
            }
        };

        slot.subscribers.insert(
            id,
            Subscriber {
                tx,
                stale_while_revalidate: options.stale_while_revalidate,
            },
        );
        drop(keys);

        if let Some(pending) = pending {
            pending.spawn();
        }
        Subscription::new(id, key, rx, Arc::clone(shared))
    }

    /// Register `fetcher` for `key` without subscribing.
    pub fn register<F>(&self, key: impl Into<CacheKey>, fetcher: F, options: SyncOptions)
    where
        F: Fetcher<T> + 'static,
    {
        let key = key.into();
        let mut keys = self.shared.lock_keys();
        keys.entry(key)
            .or_insert_with(|| KeySlot::new(self.shared.defaults.clone()))
            .register(Arc::new(fetcher), options);
    }

    /// Force a fetch for `key`, bypassing freshness.
    ///
    /// Supersedes any in-flight fetch for the key. Resolves with the value of whichever fetch
    /// finally settles the key, so a refresh that gets superseded by a later one still
    /// resolves, with the later result.
    pub async fn refresh(&self, key: impl Into<CacheKey>) -> Result<T> {
        let key = key.into();
        let (rx, pending) = {
            let shared = &self.shared;
            let mut keys = shared.lock_keys();
            let slot = match keys.get_mut(&key) {
                Some(slot) => slot,
                None => return Err(Error::UnknownKey { key }),
            };
            let fetcher = match slot.fetcher.clone() {
                Some(fetcher) => fetcher,
                None => return Err(Error::UnknownKey { key }),
            };
            let options = slot.options.clone();

            let (tx, rx) = oneshot::channel();
            slot.waiters.retain(|w| !w.is_closed());
            slot.waiters.push(tx);

            let current = shared.store.peek(&key);
            slot.broadcast(SyncState::revalidating(
                current.as_ref().map(|e| e.value.clone()),
                current.map_or(false, |e| e.stale),
            ));
            (rx, shared.start_fetch(slot, &key, fetcher, options))
        };
        pending.spawn();

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Fetch(e)),
            Err(_) => Err(Error::Closed { key }),
        }
    }

    /// Register `fetcher` for `key`, then [`refresh`](Self::refresh) it.
    pub async fn refresh_with<F>(
        &self,
        key: impl Into<CacheKey>,
        fetcher: F,
        options: SyncOptions,
    ) -> Result<T>
    where
        F: Fetcher<T> + 'static,
    {
        let key = key.into();
        self.register(key.clone(), fetcher, options);
        self.refresh(key).await
    }

    /// Mark `key` stale without fetching; the next subscription or refresh decides.
    ///
    /// Current subscribers are told the value is stale. Returns whether the key was cached.
    pub fn invalidate(&self, key: impl Into<CacheKey>) -> bool {
        let key = key.into();
        let shared = &self.shared;
        let mut keys = shared.lock_keys();
        if !shared.store.invalidate(&key) {
            return false;
        }
        debug!(key = %key, "invalidated");

        if let (Some(slot), Some(entry)) = (keys.get_mut(&key), shared.store.peek(&key)) {
            let state = if slot.task.is_some() {
                SyncState::revalidating(Some(entry.value), true)
            } else {
                SyncState::stale(entry.value)
            };
            slot.broadcast(state);
        }
        true
    }

    /// Apply a local update to the cached value and mark it fresh, without fetching.
    ///
    /// `updater` receives the current value, if any, and runs with nothing locked, so it may
    /// call back into the synchronizer. Subscribers receive the new value. An in-flight fetch
    /// is left running and overwrites the update if it succeeds.
    pub fn mutate<F>(&self, key: impl Into<CacheKey>, updater: F) -> T
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let key = key.into();
        let shared = &self.shared;
        let current = shared.store.peek(&key).map(|e| e.value);
        let value = updater(current.as_ref());

        let mut keys = shared.lock_keys();
        let evicted = shared.store.put(key.clone(), value.clone());
        if let Some(slot) = keys.get_mut(&key) {
            slot.broadcast(SyncState::fresh(value.clone()));
        }
        if let Some(evicted) = evicted {
            shared.release_if_idle(&mut keys, &evicted);
        }
        value
    }

    /// Read through the store with the key's registered TTL (or the defaults).
    pub fn cached(&self, key: impl Into<CacheKey>) -> Option<CacheEntry<T>> {
        let key = key.into();
        let ttl = {
            let keys = self.shared.lock_keys();
            keys.get(&key)
                .map(|slot| slot.options.ttl)
                .unwrap_or(self.shared.defaults.ttl)
        };
        self.shared.store.get(&key, ttl)
    }

    pub fn is_fetching(&self, key: impl Into<CacheKey>) -> bool {
        let key = key.into();
        self.shared
            .lock_keys()
            .get(&key)
            .map_or(false, |slot| slot.task.is_some())
    }

    pub fn subscriber_count(&self, key: impl Into<CacheKey>) -> usize {
        let key = key.into();
        self.shared
            .lock_keys()
            .get(&key)
            .map_or(0, |slot| slot.subscribers.len())
    }

    /// Number of keys the synchronizer currently keeps a registration for.
    pub fn tracked_keys(&self) -> usize {
        self.shared.lock_keys().len()
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.store.stats()
    }
}

struct Subscriber<T> {
    tx: mpsc::UnboundedSender<SyncState<T>>,
    stale_while_revalidate: bool,
}

/// Everything the synchronizer tracks for one key besides the cached entry.
struct KeySlot<T> {
    fetcher: Option<SharedFetcher<T>>,
    options: SyncOptions,
    subscribers: HashMap<u64, Subscriber<T>>,
    /// Pending `refresh()` calls; settled by whichever fetch completes the key.
    waiters: Vec<oneshot::Sender<std::result::Result<T, FetchError>>>,
    task: Option<FetchTask>,
}

impl<T: Clone> KeySlot<T> {
    fn new(options: SyncOptions) -> Self {
        Self {
            fetcher: None,
            options,
            subscribers: HashMap::new(),
            waiters: Vec::new(),
            task: None,
        }
    }

    fn register(&mut self, fetcher: SharedFetcher<T>, options: SyncOptions) {
        self.fetcher = Some(fetcher);
        self.options = options;
    }

    fn owns(&self, generation: u64) -> bool {
        self.task
            .as_ref()
            .map_or(false, |task| task.is_active(generation))
    }

    fn has_interest(&self) -> bool {
        !self.subscribers.is_empty() || self.waiters.iter().any(|w| !w.is_closed())
    }

    fn is_idle(&self) -> bool {
        self.task.is_none() && !self.has_interest()
    }

    /// Deliver `state` to every subscriber, dropping those whose stream is gone.
    fn broadcast(&mut self, state: SyncState<T>) {
        self.subscribers
            .retain(|_, sub| sub.tx.send(state.clone()).is_ok());
    }
}

pub(crate) struct Shared<T> {
    store: CacheStore<T>,
    keys: Mutex<HashMap<CacheKey, KeySlot<T>>>,
    defaults: SyncOptions,
    runtime: Handle,
    next_subscriber: AtomicU64,
    /// Shared by all keys, so a forgotten and re-created key never reuses a generation.
    next_generation: AtomicU64,
}

impl<T: Clone + Send + 'static> Shared<T> {
    // Lock order is always `keys` then the store's own lock.
    fn lock_keys(&self) -> MutexGuard<'_, HashMap<CacheKey, KeySlot<T>>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel whatever is in flight for the key and install the next fetch cycle.
    ///
    /// The returned fetch must be spawned after the key map is unlocked.
    fn start_fetch(
        self: &Arc<Self>,
        slot: &mut KeySlot<T>,
        key: &CacheKey,
        fetcher: SharedFetcher<T>,
        options: SyncOptions,
    ) -> PendingFetch<T> {
        if let Some(previous) = slot.task.take() {
            debug!(
                key = %key,
                generation = previous.generation(),
                "superseding in-flight fetch"
            );
            previous.cancel();
            self.store.stats_handle().record_cancellation();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = FetchTask::new(generation, options);
        let pending = PendingFetch {
            guard: SettleGuard {
                shared: Arc::clone(self),
                key: key.clone(),
                generation,
                settled: false,
            },
            fetcher,
            options: task.options().clone(),
            token: task.token(),
        };
        slot.task = Some(task);

        debug!(key = %key, generation, "starting fetch");
        pending
    }

    /// Apply a finished fetch cycle, unless it has been superseded or abandoned.
    fn settle(&self, key: &CacheKey, generation: u64, outcome: Outcome<T>) {
        if let Outcome::Cancelled = outcome {
            debug!(key = %key, generation, "fetch cancelled");
            return;
        }

        let mut keys = self.lock_keys();
        let slot = match keys.get_mut(key) {
            Some(slot) if slot.owns(generation) => slot,
            _ => {
                debug!(key = %key, generation, "discarding result of superseded fetch");
                return;
            }
        };
        slot.task = None;

        let mut evicted = None;
        match outcome {
            Outcome::Fetched(value) => {
                evicted = self.store.put(key.clone(), value.clone());
                slot.broadcast(SyncState::fresh(value.clone()));
                for waiter in slot.waiters.drain(..) {
                    let _ = waiter.send(Ok(value.clone()));
                }
            }
            Outcome::Failed { attempts, cause } => {
                let error = FetchError::new(key.clone(), attempts, cause);
                self.store.stats_handle().record_failure();
                warn!(key = %key, attempts, error = %error, "fetch failed");

                // Keep the last value around, flagged stale, for consumers that accept it.
                self.store.invalidate(key);
                let last = self.store.peek(key).map(|e| e.value);
                slot.subscribers.retain(|_, sub| {
                    let data = last.clone().filter(|_| sub.stale_while_revalidate);
                    sub.tx.send(SyncState::failed(error.clone(), data)).is_ok()
                });
                for waiter in slot.waiters.drain(..) {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
            Outcome::Cancelled => {}
        }
        debug!(key = %key, generation, "fetch settled");

        if let Some(evicted) = evicted {
            self.release_if_idle(&mut keys, &evicted);
        }
        self.release_if_idle(&mut keys, key);
    }

    /// The task future went away without settling (runtime shutdown or a panicking fetcher).
    fn abandon(&self, key: &CacheKey, generation: u64) {
        let mut keys = self.lock_keys();
        if let Some(slot) = keys.get_mut(key) {
            if slot.owns(generation) {
                warn!(key = %key, generation, "fetch task ended without settling");
                slot.task = None;
                // Dropping the senders fails pending refreshes with `Error::Closed`.
                slot.waiters.clear();
                self.release_if_idle(&mut keys, key);
            }
        }
    }

    pub(crate) fn unsubscribe(&self, key: &CacheKey, id: u64) {
        let mut keys = self.lock_keys();
        let slot = match keys.get_mut(key) {
            Some(slot) => slot,
            None => return,
        };
        slot.subscribers.remove(&id);
        if slot.has_interest() {
            return;
        }
        slot.waiters.clear();
        if let Some(task) = slot.task.take() {
            debug!(
                key = %key,
                generation = task.generation(),
                "last subscriber left, cancelling fetch"
            );
            task.cancel();
            self.store.stats_handle().record_cancellation();
        }
        self.release_if_idle(&mut keys, key);
    }

    /// Forget a key that nobody waits on and the store no longer holds.
    fn release_if_idle(&self, keys: &mut HashMap<CacheKey, KeySlot<T>>, key: &CacheKey) {
        let idle = keys.get(key).map_or(false, KeySlot::is_idle);
        if idle && !self.store.contains(key) {
            keys.remove(key);
            debug!(key = %key, "released key");
        }
    }
}

/// A fetch cycle installed in its key's slot but not yet running.
#[must_use = "a pending fetch does nothing until spawned"]
struct PendingFetch<T: Clone + Send + 'static> {
    guard: SettleGuard<T>,
    fetcher: SharedFetcher<T>,
    options: SyncOptions,
    token: CancellationToken,
}

impl<T: Clone + Send + 'static> PendingFetch<T> {
    /// Must not be called with the key map locked: a runtime that has shut down drops the
    /// future on the spot, and the guard's drop takes that lock.
    fn spawn(self) {
        let PendingFetch {
            mut guard,
            fetcher,
            options,
            token,
        } = self;
        let shared = Arc::clone(&guard.shared);
        let key = guard.key.clone();
        let generation = guard.generation;
        let span = tracing::debug_span!("fetch", key = %key, generation);

        let handle = shared.runtime.spawn(
            async move {
                let outcome = fetch_with_retry(
                    &guard.key,
                    fetcher.as_ref(),
                    &options,
                    &token,
                    guard.shared.store.stats_handle(),
                )
                .await;
                guard.settle(outcome);
            }
            .instrument(span),
        );
        // Finished already: rejected by a runtime that is gone, or settled in a blink. Abandoning
        // a settled generation is a no-op.
        if handle.is_finished() {
            shared.abandon(&key, generation);
        }
    }
}

/// Settles one generation exactly once; dropping it unsettled abandons the generation.
struct SettleGuard<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
    key: CacheKey,
    generation: u64,
    settled: bool,
}

impl<T: Clone + Send + 'static> SettleGuard<T> {
    fn settle(&mut self, outcome: Outcome<T>) {
        self.settled = true;
        self.shared.settle(&self.key, self.generation, outcome);
    }
}

impl<T: Clone + Send + 'static> Drop for SettleGuard<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.abandon(&self.key, self.generation);
        }
    }
}
