use rand;
use std::time::Duration;

pub use crate::config::RetryConfig;

/// Largest fraction of a delay that jitter may shave off
const MAX_JITTER_FRACTION: f64 = 0.25;

/// Exponential backoff implementation for retries
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Retries handed out so far
    current_attempt: usize,
    /// Configuration for the retry strategy
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Un-jittered delay before retry number `attempt` (zero-based):
    /// `min(base_delay * exponential_base^attempt, max_delay)`
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_ms = self.config.base_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        let exp = attempt.min(i32::MAX as usize) as i32;
        let backoff_ms = base_ms * self.config.exponential_base.powi(exp);
        // powi overflows to inf for large attempts, min() still caps it
        Duration::from_millis(backoff_ms.min(max_ms) as u64)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.config.jitter {
            return delay;
        }
        let factor = 1.0 - rand::random::<f64>() * MAX_JITTER_FRACTION;
        Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
    }

    /// Get the next backoff duration, or None once max_retries delays were handed out
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.config.max_retries {
            return None;
        }

        let delay = self.delay_for_attempt(self.current_attempt);
        self.current_attempt += 1;
        Some(self.apply_jitter(delay))
    }

    /// Retries handed out since the last reset
    pub fn attempts(&self) -> usize {
        self.current_attempt
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
