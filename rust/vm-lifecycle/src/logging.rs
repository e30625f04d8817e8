//! Tracing setup and operation timing.

use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Operation timer for measuring and logging execution duration.
///
/// ```rust,ignore
/// let timer = OpTimer::new("delete_vm", vm.reference.as_str());
/// let result = do_work().await;
/// timer.finish_with_result(result.as_ref());
/// ```
#[derive(Debug)]
pub struct OpTimer {
    operation: &'static str,
    target: String,
    start: Instant,
}

impl OpTimer {
    #[must_use]
    pub fn new(operation: &'static str, target: impl Into<String>) -> Self {
        let target = target.into();
        tracing::debug!(operation = operation, target = %target, "Operation started");
        Self {
            operation,
            target,
            start: Instant::now(),
        }
    }

    /// Log success or failure along with the elapsed time.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) {
        let duration_ms = self.start.elapsed().as_millis();

        match result {
            Ok(_) => {
                tracing::info!(
                    operation = self.operation,
                    target = %self.target,
                    duration_ms = duration_ms,
                    "Operation completed successfully"
                );
            }
            Err(e) => {
                tracing::error!(
                    operation = self.operation,
                    target = %self.target,
                    duration_ms = duration_ms,
                    error = %e,
                    "Operation failed"
                );
            }
        }
    }
}
