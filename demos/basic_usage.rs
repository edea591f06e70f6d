//! Basic Usage Example
//!
//! Shows the synchronizer serving one key to two consumers:
//! 1. A miss that fetches (with a flaky first attempt that gets retried)
//! 2. A second consumer served from cache without fetching
//! 3. Expiry, then stale-while-revalidate
//! 4. Optimistic local mutation and a forced refresh
//!
//! Run with `RUST_LOG=swr_cache=debug` to see the fetch lifecycle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swr_cache::{QueryKey, SyncConfig, Synchronizer};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
defaults:
  ttl_ms: 500
  stale_while_revalidate: true
  max_retries: 3
  retry_base_delay_ms: 100
max_entries: 64
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swr_cache=info")),
        )
        .init();

    let config = SyncConfig::from_yaml_str(CONFIG)?;
    let options = config.defaults.clone();
    let sync: Synchronizer<Vec<String>> = Synchronizer::builder().with_config(config).build()?;

    let key = QueryKey::new("invoices").param("status", "open").build();
    println!("key: {}", key);

    // Simulated backend: the first call fails, later calls return a growing list.
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = {
        let calls = Arc::clone(&calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if n == 0 {
                    anyhow::bail!("connection reset");
                }
                let invoices: Vec<String> = (1..=n).map(|i| format!("INV-{:04}", i)).collect();
                Ok(invoices)
            }
        }
    };

    let mut dashboard = sync.subscribe(key.clone(), fetcher.clone(), options.clone());
    while let Some(state) = dashboard.next_state().await {
        println!(
            "dashboard: loading={} stale={} data={:?}",
            state.loading, state.stale, state.data
        );
        if !state.loading {
            break;
        }
    }

    let mut sidebar = sync.subscribe(key.clone(), fetcher.clone(), options.clone());
    if let Some(state) = sidebar.next_state().await {
        println!("sidebar (cached): {:?}", state.data);
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    let mut report = sync.subscribe(key.clone(), fetcher, options);
    for _ in 0..2 {
        if let Some(state) = report.next_state().await {
            println!("report: stale={} data={:?}", state.stale, state.data);
        }
    }

    let updated = sync.mutate(key.clone(), |current| {
        let mut next = current.cloned().unwrap_or_default();
        next.push("INV-DRAFT".to_string());
        next
    });
    println!("after local write: {:?}", updated);

    let latest = sync.refresh(key.clone()).await?;
    println!("after refresh: {:?}", latest);
    println!("fetch calls: {}", calls.load(Ordering::SeqCst));
    println!("stats: {:?}", sync.stats());

    dashboard.close();
    sidebar.close();
    report.close();
    Ok(())
}
