use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub use crate::config::CircuitBreakerConfig;
use crate::error::{ErrorClass, NetraError, Result};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected without being sent
    Open,
    /// Recovery timeout elapsed, a limited number of trial requests go through
    HalfOpen,
}

/// Point-in-time view of a breaker, suitable for health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub seconds_since_last_failure: Option<f64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    half_open_in_flight: usize,
    /// Bumped on every transition so stale trial permits can be told apart
    epoch: u64,
    last_failure: Option<Instant>,
}

/// Which half-open slot, if any, an outcome releases
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Caller of the manual `allow_request`/`record_*` API
    Current,
    Held(u64),
    None,
}

/// Circuit breaker guarding one named operation
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerState>,
    total_calls: AtomicU64,
    rejected_calls: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    config: CircuitBreakerConfig,
}

/// Admission for one call; a half-open slot is returned when this drops
/// without an outcome, e.g. when the caller's future is cancelled
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    slot: Slot,
}

impl TrialPermit<'_> {
    fn succeeded(mut self) {
        let slot = std::mem::replace(&mut self.slot, Slot::None);
        self.breaker.apply_success(slot);
    }

    fn failed(mut self) {
        let slot = std::mem::replace(&mut self.slot, Slot::None);
        self.breaker.apply_failure(slot);
    }

    fn released(mut self) {
        let slot = std::mem::replace(&mut self.slot, Slot::None);
        self.breaker.release(slot);
    }
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if let Slot::Held(_) = self.slot {
            debug!(circuit = %self.breaker.name, "Half-open trial abandoned, releasing slot");
            self.breaker.release(self.slot);
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                epoch: 0,
                last_failure: None,
            }),
            total_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    // Never held across an await
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recovery_elapsed(&self, inner: &BreakerState) -> bool {
        match inner.last_failure {
            Some(at) => at.elapsed() >= self.config.recovery_timeout,
            None => true,
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.epoch += 1;
        inner.consecutive_successes = 0;
        inner.half_open_in_flight = 0;
        if to == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
        crate::circuit_event!(self.name, from, to);
    }

    fn release_slot(inner: &mut BreakerState, slot: Slot) {
        if inner.state != CircuitState::HalfOpen {
            return;
        }
        let owned = match slot {
            Slot::Current => true,
            Slot::Held(epoch) => epoch == inner.epoch,
            Slot::None => false,
        };
        if owned {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn admit(&self) -> Option<TrialPermit<'_>> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();

        let slot = match inner.state {
            CircuitState::Closed => Some(Slot::None),
            CircuitState::Open => {
                if self.recovery_elapsed(&inner) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_in_flight = 1;
                    Some(Slot::Held(inner.epoch))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Some(Slot::Held(inner.epoch))
                } else {
                    None
                }
            }
        };

        if slot.is_none() {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            debug!(circuit = %self.name, state = ?inner.state, "Request rejected by circuit breaker");
        }
        slot.map(|slot| TrialPermit {
            breaker: self,
            slot,
        })
    }

    fn apply_success(&self, slot: Slot) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        Self::release_slot(&mut inner, slot);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!(circuit = %self.name, "Success recorded while open");
            }
        }
    }

    fn apply_failure(&self, slot: Slot) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        Self::release_slot(&mut inner, slot);
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened after consecutive failures"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "Circuit breaker re-opened after failure in half-open state");
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn release(&self, slot: Slot) {
        Self::release_slot(&mut self.lock(), slot);
    }

    /// Check if the circuit breaker allows the request to proceed.
    ///
    /// A `true` answer while half-open reserves a trial slot, so every allowed
    /// request must be followed by `record_success` or `record_failure`.
    /// [`CircuitBreaker::call`] does this itself and survives cancellation.
    pub async fn allow_request(&self) -> bool {
        match self.admit() {
            Some(mut permit) => {
                // Ownership of the slot passes to the caller
                permit.slot = Slot::None;
                true
            }
            None => false,
        }
    }

    /// Record a successful operation
    pub async fn record_success(&self) {
        self.apply_success(Slot::Current);
    }

    /// Record a failed operation
    pub async fn record_failure(&self) {
        self.apply_failure(Slot::Current);
    }

    /// Run `operation` through the breaker.
    ///
    /// Validation errors and JSON-RPC error replies do not count against the
    /// breaker: the dependency answered, the request was wrong. Dropping the
    /// returned future mid-call gives a half-open trial slot back.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(permit) = self.admit() else {
            return Err(NetraError::CircuitOpen(self.name.clone()));
        };

        let result = operation().await;
        match &result {
            Ok(_) => permit.succeeded(),
            Err(NetraError::Rpc { .. }) => permit.released(),
            Err(err) if err.class() == ErrorClass::Validation => permit.released(),
            Err(_) => permit.failed(),
        }
        result
    }

    /// Get the current state, moving Open to HalfOpen once the recovery timeout passed
    pub async fn get_state(&self) -> CircuitState {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open && self.recovery_elapsed(&inner) {
            self.transition(&mut inner, CircuitState::HalfOpen);
        }
        inner.state
    }

    pub async fn status(&self) -> CircuitBreakerStatus {
        let state = self.get_state().await;
        let inner = self.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            seconds_since_last_failure: inner.last_failure.map(|at| at.elapsed().as_secs_f64()),
        }
    }

    /// Force the circuit closed and forget past failures
    pub async fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed);
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    /// Force the circuit open, starting a fresh recovery timeout
    pub async fn trip(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        self.transition(&mut inner, CircuitState::Open);
    }
}

/// Named breakers shared across callers, one per guarded operation
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    pub async fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config.clone())
            .await
    }

    /// `config` only applies when the breaker does not exist yet
    pub async fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().await;
        Arc::clone(
            breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config))),
        )
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    pub async fn statuses(&self) -> Vec<CircuitBreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            statuses.push(breaker.status().await);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        for breaker in breakers {
            breaker.reset().await;
        }
    }
}
