use super::state::SyncState;
use super::synchronizer::Shared;
use crate::cache::CacheKey;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

/// A consumer's view of one key: a stream of [`SyncState`] notifications.
///
/// Closing (or dropping) the subscription unregisters it. When it was the last party
/// waiting on the key, the key's in-flight fetch is cancelled and will neither write to the
/// cache nor notify anyone.
pub struct Subscription<T: Clone + Send + 'static> {
    id: u64,
    key: CacheKey,
    rx: UnboundedReceiver<SyncState<T>>,
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub(crate) fn new(
        id: u64,
        key: CacheKey,
        rx: UnboundedReceiver<SyncState<T>>,
        shared: Arc<Shared<T>>,
    ) -> Self {
        Self {
            id,
            key,
            rx,
            shared,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the next notification.
    pub async fn next_state(&mut self) -> Option<SyncState<T>> {
        self.rx.recv().await
    }

    /// The next already-delivered notification, without waiting.
    pub fn try_next_state(&mut self) -> Option<SyncState<T>> {
        match self.rx.try_recv() {
            Ok(state) => Some(state),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Unsubscribe now instead of at drop.
    pub fn close(self) {
        drop(self);
    }
}

impl<T: Clone + Send + 'static> Stream for Subscription<T> {
    type Item = SyncState<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.shared.unsubscribe(&self.key, self.id);
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
