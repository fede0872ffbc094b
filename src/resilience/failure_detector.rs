use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use crate::config::FailureDetectorConfig;
use crate::error::{ErrorClass, NetraError, StorageError};

/// What kind of failure was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Connection,
    Timeout,
    Protocol,
    Validation,
    ResourceExhausted,
    Unknown,
}

impl FailureType {
    pub fn from_error(err: &NetraError) -> Self {
        if let NetraError::Storage(StorageError::CapacityExceeded(_)) = err {
            return FailureType::ResourceExhausted;
        }
        match err.class() {
            ErrorClass::Connection => FailureType::Connection,
            ErrorClass::Timeout => FailureType::Timeout,
            ErrorClass::Protocol => FailureType::Protocol,
            ErrorClass::Validation => FailureType::Validation,
            ErrorClass::Other => FailureType::Unknown,
        }
    }
}

/// A single observed failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub service: String,
    pub failure_type: FailureType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl FailureEvent {
    pub fn new(
        service: impl Into<String>,
        failure_type: FailureType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            failure_type,
            message: message.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Repeated failures of one type against one service
#[derive(Debug, Clone, Serialize)]
pub struct FailurePattern {
    pub service: String,
    pub failure_type: FailureType,
    pub occurrences: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub rate_per_minute: f64,
}

/// Passive aggregator of failure events
#[derive(Debug)]
pub struct FailureDetector {
    events: Mutex<VecDeque<FailureEvent>>,
    config: FailureDetectorConfig,
}

impl Default for FailureDetector {
    fn default() -> Self {
        Self::new(FailureDetectorConfig::default())
    }
}

fn window_start(window: Duration) -> DateTime<Utc> {
    let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl FailureDetector {
    pub fn new(config: FailureDetectorConfig) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.max_events.min(1_024))),
            config,
        }
    }

    pub async fn record_failure(&self, event: FailureEvent) {
        debug!(
            service = %event.service,
            failure_type = ?event.failure_type,
            message = %event.message,
            "Failure recorded"
        );
        let mut events = self.events.lock().await;
        events.push_back(event);
        while events.len() > self.config.max_events {
            events.pop_front();
        }
    }

    /// Record `err` against `service`, classifying it on the way
    pub async fn record_error(&self, service: &str, err: &NetraError) {
        let event = FailureEvent::new(service, FailureType::from_error(err), err.to_string());
        self.record_failure(event).await;
    }

    /// Failures for `service` newer than `window`, oldest first
    pub async fn recent_failures(&self, service: &str, window: Duration) -> Vec<FailureEvent> {
        let since = window_start(window);
        let events = self.events.lock().await;
        events
            .iter()
            .filter(|e| e.service == service && e.timestamp >= since)
            .cloned()
            .collect()
    }

    pub async fn failure_count(&self, service: &str, window: Duration) -> usize {
        let since = window_start(window);
        let events = self.events.lock().await;
        events
            .iter()
            .filter(|e| e.service == service && e.timestamp >= since)
            .count()
    }

    /// Failures per minute over `window`
    pub async fn failure_rate(&self, service: &str, window: Duration) -> f64 {
        let minutes = window.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        self.failure_count(service, window).await as f64 / minutes
    }

    /// Group failures inside the pattern window by (service, type), keeping
    /// groups with at least `pattern_threshold` events, most frequent first.
    pub async fn detect_patterns(&self) -> Vec<FailurePattern> {
        let since = window_start(self.config.pattern_window);
        let minutes = (self.config.pattern_window.as_secs_f64() / 60.0).max(f64::MIN_POSITIVE);

        let mut groups: HashMap<(String, FailureType), FailurePattern> = HashMap::new();
        {
            let events = self.events.lock().await;
            for event in events.iter().filter(|e| e.timestamp >= since) {
                let pattern = groups
                    .entry((event.service.clone(), event.failure_type))
                    .or_insert_with(|| FailurePattern {
                        service: event.service.clone(),
                        failure_type: event.failure_type,
                        occurrences: 0,
                        first_seen: event.timestamp,
                        last_seen: event.timestamp,
                        rate_per_minute: 0.0,
                    });
                pattern.occurrences += 1;
                pattern.first_seen = pattern.first_seen.min(event.timestamp);
                pattern.last_seen = pattern.last_seen.max(event.timestamp);
            }
        }

        let mut patterns: Vec<FailurePattern> = groups
            .into_values()
            .filter(|p| p.occurrences >= self.config.pattern_threshold)
            .map(|mut p| {
                p.rate_per_minute = p.occurrences as f64 / minutes;
                p
            })
            .collect();
        patterns.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.service.cmp(&b.service))
        });

        for pattern in &patterns {
            warn!(
                service = %pattern.service,
                failure_type = ?pattern.failure_type,
                occurrences = pattern.occurrences,
                "Failure pattern detected"
            );
        }
        patterns
    }

    /// True once the service fails faster than `degraded_failure_rate` per minute
    pub async fn is_degraded(&self, service: &str) -> bool {
        self.failure_rate(service, self.config.pattern_window).await
            > self.config.degraded_failure_rate
    }

    /// Forget all events for `service`
    pub async fn clear(&self, service: &str) {
        self.events.lock().await.retain(|e| e.service != service);
    }

    /// Services with at least one recorded failure, sorted
    pub async fn services(&self) -> Vec<String> {
        let events = self.events.lock().await;
        let mut services: Vec<String> = events.iter().map(|e| e.service.clone()).collect();
        services.sort();
        services.dedup();
        services
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}
