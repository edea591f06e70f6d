use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Source of values for one key: the remote data provider seam.
///
/// Called once per attempt, so it must be re-invocable. Any timeout is the implementor's
/// responsibility; the synchronizer waits for as long as the future runs unless the fetch is
/// cancelled.
///
/// Closures returning a future implement this automatically:
///
/// ```rust
/// use swr_cache::Fetcher;
///
/// async fn load_clients() -> anyhow::Result<Vec<String>> {
///     Ok(vec!["acme".into()])
/// }
///
/// fn assert_fetcher<F: Fetcher<Vec<String>>>(_: &F) {}
/// assert_fetcher(&load_clients);
/// ```
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> Fetcher<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn fetch(&self) -> anyhow::Result<T> {
        (self)().await
    }
}

pub(crate) type SharedFetcher<T> = Arc<dyn Fetcher<T>>;
