//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swr_cache::Fetcher;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once; `RUST_LOG=swr_cache=debug` shows fetch lifecycles.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One scripted fetch: how long it takes and what it yields.
#[derive(Clone, Debug)]
pub enum Step {
    Value(String, Duration),
    Fail(&'static str, Duration),
    Panic(Duration),
}

pub fn value(v: &str, delay_ms: u64) -> Step {
    Step::Value(v.to_string(), Duration::from_millis(delay_ms))
}

pub fn fail(msg: &'static str, delay_ms: u64) -> Step {
    Step::Fail(msg, Duration::from_millis(delay_ms))
}

pub fn panic_after(delay_ms: u64) -> Step {
    Step::Panic(Duration::from_millis(delay_ms))
}

/// Fetcher that plays back a list of steps, one per call, then repeats `fallback`.
///
/// Counts calls (attempts started) and completions (attempts that ran to the end, i.e.
/// were not dropped by cancellation).
#[derive(Clone)]
pub struct Scripted {
    inner: Arc<Inner>,
}

struct Inner {
    steps: Mutex<VecDeque<Step>>,
    fallback: Option<Step>,
    calls: AtomicU32,
    completed: AtomicU32,
}

impl Scripted {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::build(steps, None)
    }

    pub fn repeating(step: Step) -> Self {
        Self::build(Vec::new(), Some(step))
    }

    fn build(steps: Vec<Step>, fallback: Option<Step>) -> Self {
        Self {
            inner: Arc::new(Inner {
                steps: Mutex::new(steps.into()),
                fallback,
                calls: AtomicU32::new(0),
                completed: AtomicU32::new(0),
            }),
        }
    }

    pub fn calls(&self) -> u32 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u32 {
        self.inner.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher<String> for Scripted {
    async fn fetch(&self) -> anyhow::Result<String> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.inner.steps.lock().unwrap();
            steps.pop_front().or_else(|| self.inner.fallback.clone())
        };
        let step = step.expect("scripted fetcher ran out of steps");

        match step {
            Step::Value(v, delay) => {
                tokio::time::sleep(delay).await;
                self.inner.completed.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            }
            Step::Fail(msg, delay) => {
                tokio::time::sleep(delay).await;
                self.inner.completed.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!(msg))
            }
            Step::Panic(delay) => {
                tokio::time::sleep(delay).await;
                panic!("scripted fetcher panicked");
            }
        }
    }
}
