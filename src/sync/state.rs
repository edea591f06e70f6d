use crate::error::FetchError;

/// One notification on a subscription stream.
///
/// `data` and `error` are independent: after a terminal failure with stale-while-revalidate
/// enabled, both are set so a consumer sees the most recent usable value and the most recent
/// error at once.
#[derive(Debug, Clone)]
pub struct SyncState<T> {
    pub data: Option<T>,
    pub error: Option<FetchError>,
    /// `data` may no longer reflect the source of truth.
    pub stale: bool,
    /// A fetch is in progress on behalf of this subscription.
    pub loading: bool,
}

impl<T> SyncState<T> {
    /// Nothing to show yet; a fetch has started.
    pub fn loading() -> Self {
        Self {
            data: None,
            error: None,
            stale: false,
            loading: true,
        }
    }

    /// Freshly fetched (or freshly mutated) value.
    pub fn fresh(value: T) -> Self {
        Self {
            data: Some(value),
            error: None,
            stale: false,
            loading: false,
        }
    }

    /// Known-stale value served while, or instead of, revalidating.
    pub fn stale(value: T) -> Self {
        Self {
            data: Some(value),
            error: None,
            stale: true,
            loading: false,
        }
    }

    /// Current value kept visible while a forced fetch runs.
    pub(crate) fn revalidating(value: Option<T>, stale: bool) -> Self {
        Self {
            data: value,
            error: None,
            stale,
            loading: true,
        }
    }

    /// Terminal failure, optionally carrying the last usable value.
    pub fn failed(error: FetchError, last_value: Option<T>) -> Self {
        Self {
            stale: last_value.is_some(),
            data: last_value,
            error: Some(error),
            loading: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}
