//! Bounded retry policy for transient control-plane failures.

use std::time::Duration;

use crate::config::QuiesceConfig;
use crate::error::LifecycleError;

/// Fixed-delay retry policy keyed on XAPI error codes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between two attempts.
    pub delay: Duration,
    /// Error codes worth another attempt; anything else bails out.
    pub retryable_codes: Vec<&'static str>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, retryable_codes: Vec<&'static str>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retryable_codes,
        }
    }

    /// Policy for `VM.snapshot_with_quiesce`: only a failed quiesce is retried.
    pub fn quiesce(config: &QuiesceConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.retry_delay(),
            vec![crate::client::codes::VM_SNAPSHOT_WITH_QUIESCE_FAILED],
        )
    }

    pub fn is_retryable(&self, error: &LifecycleError) -> bool {
        error
            .code()
            .is_some_and(|code| self.retryable_codes.contains(&code))
    }

    /// Whether `error`, raised by the 1-based `attempt`, earns another try.
    pub fn should_retry(&self, attempt: u32, error: &LifecycleError) -> bool {
        attempt < self.max_attempts && self.is_retryable(error)
    }
}
