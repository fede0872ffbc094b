// src/resilience/tests/mod.rs
//! Tests for resilience features

mod circuit_breaker_tests;

// Common test utilities for resilience testing
pub(crate) mod utils {
    use std::time::Duration;

    use crate::config::{HealthCheckConfig, InMemoryConfig};
    use crate::resilience::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};

    /// Retries quickly and deterministically
    pub fn fast_retry(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    pub fn breaker_config(failure_threshold: usize, recovery_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
            success_threshold: 1,
            half_open_max_calls: 1,
        }
    }

    /// Breaker opens after two failed operations, polling effectively off
    pub fn resilience_config() -> ResilienceConfig {
        ResilienceConfig {
            circuit_breaker: breaker_config(2, Duration::from_millis(150)),
            retry: fast_retry(2),
            health_check: HealthCheckConfig {
                check_interval: Duration::from_secs(3600),
                ..HealthCheckConfig::default()
            },
            failure_detector: Default::default(),
            memory_config: InMemoryConfig {
                use_background_task: false,
                ..InMemoryConfig::default()
            },
        }
    }
}
