use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, warn};

use crate::error::{NetraError, Result};
use crate::resilience::exponential_backoff::{ExponentialBackoff, RetryConfig};

/// Decides whether an error is worth another attempt
pub type RetryClassifier = Arc<dyn Fn(&NetraError) -> bool + Send + Sync>;

/// Wraps fallible async operations with bounded exponential-backoff retry
#[derive(Clone)]
pub struct RetryHandler {
    config: RetryConfig,
    classifier: RetryClassifier,
}

impl fmt::Debug for RetryHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryHandler {
    /// Retries connection and timeout errors, everything else fails fast
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: Arc::new(NetraError::is_retryable),
        }
    }

    /// Replace the default classifier
    pub fn with_classifier<C>(mut self, classifier: C) -> Self
    where
        C: Fn(&NetraError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, the classifier rejects the error,
    /// or `max_retries` retries have been spent. The last error is returned.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(self.config.clone());
        let mut attempt = 0usize;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt, "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !(self.classifier)(&err) {
                        debug!(
                            operation = operation_name,
                            attempt,
                            error = %err,
                            "Error is not retryable"
                        );
                        return Err(err);
                    }

                    let Some(delay) = backoff.next_backoff() else {
                        warn!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    };

                    attempt += 1;
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Operation failed, retrying"
                    );
                    time::sleep(delay).await;
                }
            }
        }
    }
}
