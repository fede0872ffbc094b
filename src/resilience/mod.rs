// src/resilience/mod.rs
//! Reliability layer shared by storage and the MCP transports.
//!
//! 1. **Retry with Exponential Backoff** - bounded retries for transient failures
//! 2. **Circuit Breaking** - stop calling a failing dependency for a cooldown period
//! 3. **Failure Detection** - aggregate failure events into patterns
//! 4. **Health Monitoring** - poll registered health checks
//! 5. **Fallback Storage** - degrade from Redis to in-memory storage

mod circuit_breaker;
mod exponential_backoff;
mod failure_detector;
mod health_monitor;
mod resilient_storage;
mod retry_handler;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus,
    CircuitState,
};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use failure_detector::{
    FailureDetector, FailureDetectorConfig, FailureEvent, FailurePattern, FailureType,
};
pub use health_monitor::{
    FnHealthCheck, HealthCheck, HealthCheckConfig, HealthStatus, ServiceHealthInfo,
    ServiceHealthMonitor,
};
pub use resilient_storage::{ResilienceConfig, ResilientStorage, StorageMode, PRIMARY_SERVICE};
pub use retry_handler::{RetryClassifier, RetryHandler};
