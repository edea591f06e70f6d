use crate::cache::CacheKey;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Where a configuration problem was found and what was wrong with it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Offending field, e.g. `defaults.max_retries`
    pub field_path: Option<String>,
    /// Parser message or the rejected value
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Terminal failure of one fetch cycle: every attempt in the retry budget failed.
///
/// Cloned out to every subscriber of the key and to every pending `refresh()` call, so the
/// underlying cause is shared rather than owned.
#[derive(Debug, Clone)]
pub struct FetchError {
    key: CacheKey,
    attempts: u32,
    cause: Arc<anyhow::Error>,
}

impl FetchError {
    pub(crate) fn new(key: CacheKey, attempts: u32, cause: anyhow::Error) -> Self {
        Self {
            key,
            attempts,
            cause: Arc::new(cause),
        }
    }

    /// Key whose fetch cycle failed.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Error returned by the final attempt.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch for '{}' failed after {} attempt(s): {:#}",
            self.key, self.attempts, self.cause
        )
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.cause)
    }
}

/// Unified error type for the cache.
///
/// Only terminal fetch failures cross the cache boundary; transient attempt failures and
/// cancellations are handled internally and never surface here.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("no fetcher registered for key '{key}'")]
    UnknownKey { key: CacheKey },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("fetch task for '{key}' ended before settling")]
    Closed { key: CacheKey },

    #[error("Runtime error: {message}")]
    Runtime { message: String },
}

fn format_context(ctx: &ErrorContext) -> String {
    match (&ctx.field_path, &ctx.details) {
        (Some(field), Some(details)) => format!(" (field: {}, details: {})", field, details),
        (Some(field), None) => format!(" (field: {})", field),
        (None, Some(details)) => format!(" ({})", details),
        (None, None) => String::new(),
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The terminal fetch error, if this is one.
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            Error::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_formats_context() {
        let err = Error::configuration_with_context(
            "max_retries must be at least 1",
            ErrorContext::new()
                .with_field_path("defaults.max_retries")
                .with_details("0"),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: max_retries must be at least 1 (field: defaults.max_retries, details: 0)"
        );
        assert!(err.context().is_some());
    }

    #[test]
    fn test_fetch_error_display_and_source() {
        let err = FetchError::new(CacheKey::from("clients"), 3, anyhow::anyhow!("503 upstream"));
        assert_eq!(
            err.to_string(),
            "fetch for 'clients' failed after 3 attempt(s): 503 upstream"
        );
        assert_eq!(err.attempts(), 3);
        assert!(std::error::Error::source(&err).is_some());

        let wrapped: Error = err.into();
        assert_eq!(wrapped.as_fetch().map(FetchError::attempts), Some(3));
    }
}
