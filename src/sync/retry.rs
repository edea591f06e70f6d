//! Retry loop for a single fetch cycle.
//!
//! Both suspension points, the fetch itself and the backoff sleep, race against the task's
//! cancellation token. A cancelled cycle drops the in-flight future rather than waiting for
//! it and discarding the result.

use super::fetcher::Fetcher;
use super::options::SyncOptions;
use crate::cache::{AtomicStats, CacheKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a fetch cycle ended.
pub(crate) enum Outcome<T> {
    Fetched(T),
    /// Retry budget exhausted; carries the final attempt's error.
    Failed { attempts: u32, cause: anyhow::Error },
    /// Superseded or abandoned. Never reported to consumers.
    Cancelled,
}

pub(crate) async fn fetch_with_retry<T>(
    key: &CacheKey,
    fetcher: &dyn Fetcher<T>,
    options: &SyncOptions,
    token: &CancellationToken,
    stats: &AtomicStats,
) -> Outcome<T> {
    let budget = options.attempt_budget();
    let mut attempt = 0u32;

    loop {
        if token.is_cancelled() {
            return Outcome::Cancelled;
        }

        stats.record_attempt();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Outcome::Cancelled,
            result = fetcher.fetch() => result,
        };
        attempt += 1;

        let cause = match result {
            Ok(value) => {
                debug!(key = %key, attempt, "fetch succeeded");
                return Outcome::Fetched(value);
            }
            Err(e) => e,
        };

        if attempt >= budget {
            return Outcome::Failed {
                attempts: attempt,
                cause,
            };
        }

        let delay = options.retry_delay(attempt - 1);
        warn!(
            key = %key,
            attempt,
            max_attempts = budget,
            delay_ms = delay.as_millis() as u64,
            error = %cause,
            "fetch attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => return Outcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn options(max_retries: u32) -> SyncOptions {
        SyncOptions::new()
            .with_max_retries(max_retries)
            .with_retry_base_delay(Duration::from_millis(100))
    }

    fn failing_until(successes_after: u32, calls: Arc<AtomicU32>) -> impl Fetcher<u32> {
        move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n > successes_after {
                    Ok(n)
                } else {
                    Err(anyhow::anyhow!("attempt {} failed", n))
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt_with_exponential_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_until(2, Arc::clone(&calls));
        let stats = AtomicStats::new();
        let started = Instant::now();

        let outcome = fetch_with_retry(
            &CacheKey::from("clients"),
            &fetcher,
            &options(3),
            &CancellationToken::new(),
            &stats,
        )
        .await;

        assert!(matches!(outcome, Outcome::Fetched(3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms after the first failure, 200ms after the second.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(300), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(400), "waited {:?}", waited);
        assert_eq!(stats.to_stats().fetch_attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_until(u32::MAX, Arc::clone(&calls));

        let outcome = fetch_with_retry(
            &CacheKey::from("clients"),
            &fetcher,
            &options(3),
            &CancellationToken::new(),
            &AtomicStats::new(),
        )
        .await;

        match outcome {
            Outcome::Failed { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert_eq!(cause.to_string(), "attempt 3 failed");
            }
            _ => panic!("expected terminal failure"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_until(u32::MAX, Arc::clone(&calls));
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                // Lands inside the first 100ms backoff window.
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };

        let outcome = fetch_with_retry(
            &CacheKey::from("projects"),
            &fetcher,
            &options(5),
            &token,
            &AtomicStats::new(),
        )
        .await;
        canceller.await.unwrap();

        assert!(matches!(outcome, Outcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_in_flight_fetch() {
        let finished = Arc::new(AtomicU32::new(0));
        let fetcher = {
            let finished = Arc::clone(&finished);
            move || {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(1u32)
                }
            }
        };
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });

        let outcome = fetch_with_retry(
            &CacheKey::from("documents"),
            &fetcher,
            &options(3),
            &token,
            &AtomicStats::new(),
        )
        .await;

        assert!(matches!(outcome, Outcome::Cancelled));
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = failing_until(0, Arc::clone(&calls));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = fetch_with_retry(
            &CacheKey::from("logs"),
            &fetcher,
            &options(3),
            &token,
            &AtomicStats::new(),
        )
        .await;

        assert!(matches!(outcome, Outcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
