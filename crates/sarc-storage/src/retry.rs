//! Bounded exponential backoff shared by every object store call

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// Retry policy: attempt budget, backoff curve, and which errors qualify.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    retryable: fn(&StorageError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            retryable: StorageError::is_retryable,
        }
    }

    pub fn from_config(cfg: &sarc_core::config::RetryConfig) -> Self {
        Self::new(
            cfg.max_attempts,
            Duration::from_millis(cfg.base_delay_ms),
            Duration::from_millis(cfg.max_delay_ms),
        )
    }

    /// Replace the retryable-error predicate.
    pub fn with_predicate(mut self, retryable: fn(&StorageError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn should_retry(&self, err: &StorageError) -> bool {
        (self.retryable)(err)
    }

    /// Backoff schedule for one call: `max_attempts - 1` retries starting
    /// at `base_delay`, doubling up to `max_delay`.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `f` until it succeeds, fails permanently, or the attempt budget
    /// is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, op_name: &str, f: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let result = f
            .retry(self.backoff())
            .when(|e: &StorageError| self.should_retry(e))
            .notify(|e: &StorageError, delay: Duration| {
                tracing::warn!(
                    op = op_name,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "storage call failed, retrying: {e}"
                );
            })
            .await;

        if let Err(e) = &result {
            if self.should_retry(e) {
                tracing::error!(op = op_name, "storage retries exhausted: {e}");
            }
        }
        result
    }
}
