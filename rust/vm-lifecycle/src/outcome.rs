//! Explicit outcome of branches whose failure must not fail the caller.

use std::future::Future;

use crate::error::{LifecycleError, LifecycleResult};

/// Result of a best-effort branch.
///
/// Failures are logged and kept here instead of being propagated, so the
/// decision to ignore them is visible at the call site.
#[derive(Debug)]
#[must_use]
pub enum BestEffort {
    Completed,
    Ignored(LifecycleError),
}

impl BestEffort {
    pub fn is_completed(&self) -> bool {
        matches!(self, BestEffort::Completed)
    }

    /// Drop the outcome; failures were already logged.
    pub fn discard(self) {}
}

/// Await `future`, logging and swallowing any failure.
pub async fn best_effort<T, F>(action: &str, future: F) -> BestEffort
where
    F: Future<Output = LifecycleResult<T>>,
{
    match future.await {
        Ok(_) => BestEffort::Completed,
        Err(error) => {
            tracing::warn!(action = action, error = %error, "Best-effort step failed, ignoring");
            BestEffort::Ignored(error)
        }
    }
}
