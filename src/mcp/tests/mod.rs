// src/mcp/tests/mod.rs


pub(crate) mod utils {
    use std::time::Duration;

    use crate::config::McpClientConfig;
    use crate::resilience::{CircuitBreakerConfig, RetryConfig};

    pub fn client_config(url: &str) -> McpClientConfig {
        McpClientConfig {
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(1),
            retry: RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                exponential_base: 2.0,
                jitter: false,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: Duration::from_secs(30),
                success_threshold: 1,
                half_open_max_calls: 1,
            },
            ..McpClientConfig::new(url)
        }
    }
}
