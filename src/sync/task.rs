use super::options::SyncOptions;
use tokio_util::sync::CancellationToken;

/// Handle on the one in-flight fetch cycle for a key.
///
/// The running future owns the retry counter; the handle only carries what the synchronizer
/// needs to supersede it and to recognise its result when it comes back.
#[derive(Debug)]
pub(crate) struct FetchTask {
    generation: u64,
    token: CancellationToken,
    options: SyncOptions,
}

impl FetchTask {
    pub(crate) fn new(generation: u64, options: SyncOptions) -> Self {
        Self {
            generation,
            token: CancellationToken::new(),
            options,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Whether a result tagged `generation` may still be applied.
    pub(crate) fn is_active(&self, generation: u64) -> bool {
        self.generation == generation && !self.token.is_cancelled()
    }

    /// Stop the task at its next suspension point. Consumes the handle: a cancelled task is
    /// never active again.
    pub(crate) fn cancel(self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_deactivates() {
        let task = FetchTask::new(4, SyncOptions::default());
        let token = task.token();
        assert!(task.is_active(4));
        assert!(!task.is_active(3));

        task.cancel();
        assert!(token.is_cancelled());
    }
}
