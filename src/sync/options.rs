//! Per-subscription options and synchronizer configuration.

use crate::{Error, ErrorContext, Result};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

/// Per-subscription fetch policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawOptions")]
pub struct SyncOptions {
    /// How long a fetched value counts as fresh.
    pub ttl: Duration,
    /// Serve a stale value immediately and refresh in the background.
    pub stale_while_revalidate: bool,
    /// Total attempts per fetch cycle (first try included).
    pub max_retries: u32,
    /// Base of the exponential backoff between attempts.
    pub retry_base_delay: Duration,
    /// Upper bound on a single backoff wait. `None` leaves it uncapped.
    pub max_retry_delay: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            stale_while_revalidate: true,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            max_retry_delay: None,
        }
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_max_retry_delay(mut self, cap: Duration) -> Self {
        self.max_retry_delay = Some(cap);
        self
    }

    /// Attempts allowed per fetch cycle. A zero `max_retries` still gets one try.
    pub fn attempt_budget(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Backoff before the attempt following failed attempt `attempt` (0-based):
    /// `retry_base_delay * 2^attempt`, saturating, capped by `max_retry_delay`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .retry_base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX);
        match self.max_retry_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::configuration_with_context(
                "max_retries must be at least 1",
                ErrorContext::new()
                    .with_field_path("max_retries")
                    .with_details("counts total attempts, including the first"),
            ));
        }
        if let Some(cap) = self.max_retry_delay {
            if cap < self.retry_base_delay {
                return Err(Error::configuration_with_context(
                    "max_retry_delay is shorter than retry_base_delay",
                    ErrorContext::new()
                        .with_field_path("max_retry_delay_ms")
                        .with_details(format!(
                            "{}ms < {}ms",
                            cap.as_millis(),
                            self.retry_base_delay.as_millis()
                        )),
                ));
            }
        }
        Ok(())
    }
}

/// Wire shape of [`SyncOptions`]: durations in milliseconds, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawOptions {
    ttl_ms: Option<u64>,
    stale_while_revalidate: Option<bool>,
    max_retries: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    max_retry_delay_ms: Option<u64>,
}

impl From<RawOptions> for SyncOptions {
    fn from(raw: RawOptions) -> Self {
        let defaults = SyncOptions::default();
        Self {
            ttl: raw.ttl_ms.map(Duration::from_millis).unwrap_or(defaults.ttl),
            stale_while_revalidate: raw
                .stale_while_revalidate
                .unwrap_or(defaults.stale_while_revalidate),
            max_retries: raw.max_retries.unwrap_or(defaults.max_retries),
            retry_base_delay: raw
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            max_retry_delay: raw.max_retry_delay_ms.map(Duration::from_millis),
        }
    }
}

/// Synchronizer-wide configuration.
///
/// ```yaml
/// max_entries: 500
/// defaults:
///   ttl_ms: 60000
///   stale_while_revalidate: true
///   max_retries: 3
///   retry_base_delay_ms: 1000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Options used by `refresh`/`cached` for keys that never registered their own.
    pub defaults: SyncOptions,
    /// LRU bound on the number of cached keys. Unbounded when absent.
    pub max_entries: Option<NonZeroUsize>,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(mut self, defaults: SyncOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_max_entries(mut self, max_entries: NonZeroUsize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: SyncConfig = serde_yaml::from_str(s).map_err(|e| {
            Error::configuration_with_context(
                "invalid YAML configuration",
                ErrorContext::new()
                    .with_details(e.to_string()),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(s).map_err(|e| {
            Error::configuration_with_context(
                "invalid JSON configuration",
                ErrorContext::new()
                    .with_details(e.to_string()),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config file {}", path.display()),
                ErrorContext::new()
                    .with_details(e.to_string()),
            )
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_yaml_str(&contents),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.defaults.validate().map_err(|e| match e {
            Error::Configuration {
                message,
                mut context,
            } => {
                context.field_path = context.field_path.map(|f| format!("defaults.{}", f));
                Error::Configuration { message, context }
            }
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = SyncOptions::default();
        assert_eq!(opts.ttl, Duration::from_secs(300));
        assert!(opts.stale_while_revalidate);
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.retry_base_delay, Duration::from_secs(1));
        assert!(opts.max_retry_delay.is_none());
    }

    #[test]
    fn test_builder() {
        let opts = SyncOptions::new()
            .with_ttl(Duration::from_millis(100))
            .with_stale_while_revalidate(false)
            .with_max_retries(5)
            .with_retry_base_delay(Duration::from_millis(10));
        assert_eq!(opts.ttl, Duration::from_millis(100));
        assert!(!opts.stale_while_revalidate);
        assert_eq!(opts.attempt_budget(), 5);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let opts = SyncOptions::new().with_retry_base_delay(Duration::from_millis(100));
        assert_eq!(opts.retry_delay(0), Duration::from_millis(100));
        assert_eq!(opts.retry_delay(1), Duration::from_millis(200));
        assert_eq!(opts.retry_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_delay_saturates_and_caps() {
        let opts = SyncOptions::new().with_retry_base_delay(Duration::from_secs(1));
        assert_eq!(opts.retry_delay(40), Duration::from_secs(u32::MAX as u64));

        let capped = opts.with_max_retry_delay(Duration::from_secs(5));
        assert_eq!(capped.retry_delay(2), Duration::from_secs(4));
        assert_eq!(capped.retry_delay(3), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let opts = SyncOptions::new().with_max_retries(0);
        assert_eq!(opts.attempt_budget(), 1);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_yaml_config() {
        let config = SyncConfig::from_yaml_str(
            "max_entries: 2\ndefaults:\n  ttl_ms: 100\n  max_retries: 4\n",
        )
        .unwrap();
        assert_eq!(config.max_entries, NonZeroUsize::new(2));
        assert_eq!(config.defaults.ttl, Duration::from_millis(100));
        assert_eq!(config.defaults.max_retries, 4);
        // Unset fields keep their defaults.
        assert_eq!(config.defaults.retry_base_delay, Duration::from_secs(1));
        assert!(config.defaults.stale_while_revalidate);
    }

    #[test]
    fn test_json_config() {
        let config = SyncConfig::from_json_str(
            r#"{"defaults": {"stale_while_revalidate": false, "max_retry_delay_ms": 8000}}"#,
        )
        .unwrap();
        assert!(config.max_entries.is_none());
        assert!(!config.defaults.stale_while_revalidate);
        assert_eq!(config.defaults.max_retry_delay, Some(Duration::from_secs(8)));
    }

    #[test]
    fn test_invalid_config_is_rejected_with_field_path() {
        let err = SyncConfig::from_yaml_str("defaults:\n  max_retries: 0\n").unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("defaults.max_retries"));

        assert!(SyncConfig::from_yaml_str("defaults:\n  ttl: 5\n").is_err());
        assert!(SyncConfig::from_yaml_str("max_entries: 0\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = SyncConfig::from_path("/nonexistent/swr-cache.yaml").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
