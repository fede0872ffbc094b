// src/resilience/tests/circuit_breaker_tests.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time;
use tracing_test::traced_test;

use super::utils::breaker_config;
use crate::error::NetraError;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};

fn connection_error() -> NetraError {
    NetraError::Connection("connection refused".to_string())
}

#[tokio::test]
async fn test_initial_state_is_closed() {
    let breaker = CircuitBreaker::new("redis", CircuitBreakerConfig::default());

    assert_eq!(breaker.get_state().await, CircuitState::Closed);
    assert!(breaker.allow_request().await);
    assert_eq!(breaker.name(), "redis");
}

#[tokio::test]
async fn test_circuit_opens_after_failures() {
    let breaker = CircuitBreaker::new("redis", breaker_config(3, Duration::from_secs(1)));

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.get_state().await, CircuitState::Closed);

    breaker.record_failure().await;
    assert_eq!(
        breaker.get_state().await,
        CircuitState::Open,
        "Circuit should be Open after 3 failures"
    );
    assert!(!breaker.allow_request().await);
}

#[tokio::test]
async fn test_success_resets_failure_streak() {
    let breaker = CircuitBreaker::new("redis", breaker_config(3, Duration::from_secs(1)));

    breaker.record_failure().await;
    breaker.record_failure().await;
    breaker.record_success().await;
    breaker.record_failure().await;
    breaker.record_failure().await;

    assert_eq!(breaker.get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_circuit_transitions_to_half_open() {
    let breaker = CircuitBreaker::new("redis", breaker_config(2, Duration::from_millis(50)));

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.get_state().await, CircuitState::Open);

    time::sleep(Duration::from_millis(70)).await;

    assert_eq!(breaker.get_state().await, CircuitState::HalfOpen);
    // One trial slot
    assert!(breaker.allow_request().await);
    assert!(!breaker.allow_request().await);
}

#[tokio::test]
async fn test_half_open_success_closes_circuit() {
    let config = CircuitBreakerConfig {
        success_threshold: 2,
        half_open_max_calls: 2,
        ..breaker_config(1, Duration::from_millis(30))
    };
    let breaker = CircuitBreaker::new("mcp", config);

    breaker.record_failure().await;
    time::sleep(Duration::from_millis(50)).await;

    assert!(breaker.allow_request().await);
    breaker.record_success().await;
    assert_eq!(breaker.get_state().await, CircuitState::HalfOpen);

    assert!(breaker.allow_request().await);
    breaker.record_success().await;
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_half_open_failure_reopens_circuit() {
    let breaker = CircuitBreaker::new("redis", breaker_config(1, Duration::from_millis(30)));

    breaker.record_failure().await;
    time::sleep(Duration::from_millis(50)).await;
    assert!(breaker.allow_request().await);

    breaker.record_failure().await;
    assert_eq!(breaker.get_state().await, CircuitState::Open);
    assert!(!breaker.allow_request().await);
}

#[tokio::test]
async fn test_cancelled_half_open_trial_frees_its_slot() {
    let breaker = CircuitBreaker::new("mcp", breaker_config(1, Duration::from_millis(30)));
    breaker.record_failure().await;
    time::sleep(Duration::from_millis(50)).await;

    // The trial is dropped mid-flight by the caller's timeout
    let abandoned = time::timeout(
        Duration::from_millis(10),
        breaker.call(|| async {
            time::sleep(Duration::from_secs(5)).await;
            Ok::<(), NetraError>(())
        }),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(breaker.get_state().await, CircuitState::HalfOpen);

    let value = breaker.call(|| async { Ok::<_, NetraError>(7) }).await.unwrap();
    assert_eq!(value, 7);
    assert_eq!(breaker.get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_stale_trial_does_not_release_newer_slot() {
    let breaker = CircuitBreaker::new("mcp", breaker_config(1, Duration::from_millis(30)));
    breaker.record_failure().await;
    time::sleep(Duration::from_millis(50)).await;

    // Trial admitted in the first half-open window, still in flight
    let mut trial = Box::pin(breaker.call(|| async {
        time::sleep(Duration::from_secs(5)).await;
        Ok::<(), NetraError>(())
    }));
    assert!(futures::poll!(&mut trial).is_pending());

    breaker.trip().await;
    time::sleep(Duration::from_millis(50)).await;
    assert!(breaker.allow_request().await);

    // Abandoning the old trial leaves the new window's slot taken
    drop(trial);
    assert!(!breaker.allow_request().await);
}

#[tokio::test]
async fn test_call_rejects_without_running_operation_when_open() {
    let breaker = CircuitBreaker::new("redis", breaker_config(1, Duration::from_secs(60)));
    breaker.trip().await;

    let runs = AtomicUsize::new(0);
    let result: Result<(), _> = breaker
        .call(|| async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(NetraError::CircuitOpen(name)) if name == "redis"));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_call_counts_transport_failures() {
    let breaker = CircuitBreaker::new("mcp", breaker_config(2, Duration::from_secs(60)));

    for _ in 0..2 {
        let result: Result<(), _> = breaker.call(|| async { Err(connection_error()) }).await;
        assert!(matches!(result, Err(NetraError::Connection(_))));
    }

    assert_eq!(breaker.get_state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_rpc_and_validation_errors_do_not_trip() {
    let breaker = CircuitBreaker::new("mcp", breaker_config(2, Duration::from_secs(60)));

    for _ in 0..5 {
        let _: Result<(), _> = breaker
            .call(|| async {
                Err(NetraError::Rpc {
                    code: -32601,
                    message: "Method not found".to_string(),
                    data: None,
                })
            })
            .await;
        let _: Result<(), _> = breaker
            .call(|| async { Err(NetraError::Validation("bad input".to_string())) })
            .await;
    }

    assert_eq!(breaker.get_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_status_and_reset() {
    let breaker = CircuitBreaker::new("redis", breaker_config(2, Duration::from_secs(60)));

    let _: Result<(), _> = breaker.call(|| async { Ok(()) }).await;
    let _: Result<(), _> = breaker.call(|| async { Err(connection_error()) }).await;
    let _: Result<(), _> = breaker.call(|| async { Err(connection_error()) }).await;
    let _: Result<(), _> = breaker.call(|| async { Ok(()) }).await;

    let status = breaker.status().await;
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.total_calls, 4);
    assert_eq!(status.rejected_calls, 1);
    assert_eq!(status.total_failures, 2);
    assert_eq!(status.total_successes, 1);
    assert!(status.seconds_since_last_failure.is_some());

    breaker.reset().await;
    let status = breaker.status().await;
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.seconds_since_last_failure.is_none());
}

#[tokio::test]
#[traced_test]
async fn test_state_changes_are_logged() {
    let breaker = CircuitBreaker::new("logged", breaker_config(1, Duration::from_secs(60)));
    breaker.record_failure().await;

    assert!(logs_contain("Circuit breaker state change"));
    assert!(logs_contain("logged"));
}

#[tokio::test]
async fn test_registry_shares_breakers_by_name() {
    let registry = CircuitBreakerRegistry::new(breaker_config(1, Duration::from_secs(60)));

    let a = registry.get_or_create("mcp:search").await;
    let b = registry.get_or_create("mcp:search").await;
    assert!(std::sync::Arc::ptr_eq(&a, &b));

    let custom = registry
        .get_or_create_with("redis", breaker_config(10, Duration::from_secs(1)))
        .await;
    assert_eq!(custom.config().failure_threshold, 10);
    assert!(registry.get("unknown").await.is_none());

    a.record_failure().await;
    let statuses = registry.statuses().await;
    let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["mcp:search", "redis"]);
    assert_eq!(statuses[0].state, CircuitState::Open);

    registry.reset_all().await;
    assert_eq!(a.get_state().await, CircuitState::Closed);
}
