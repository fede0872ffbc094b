use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task;
use tokio::time;
use tracing::{debug, error, info, warn};

pub use crate::config::HealthCheckConfig;
use crate::error::{NetraError, Result};
use crate::resilience::failure_detector::FailureDetector;

/// Something that can report whether a dependency is reachable
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<()>;
}

/// Adapts an async closure into a [`HealthCheck`]
pub struct FnHealthCheck<F>(pub F);

#[async_trait]
impl<F, Fut> HealthCheck for FnHealthCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn check(&self) -> Result<()> {
        (self.0)().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// Registered but not checked yet
    Unknown,
}

impl HealthStatus {
    fn severity(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthInfo {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_checks: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub response_time_ms: Option<u64>,
}

impl ServiceHealthInfo {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unknown,
            last_check: None,
            last_success: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_checks: 0,
            total_failures: 0,
            last_error: None,
            response_time_ms: None,
        }
    }

    fn apply(&mut self, outcome: &Result<()>, elapsed: Duration, config: &HealthCheckConfig) {
        let now = Utc::now();
        self.last_check = Some(now);
        self.total_checks += 1;
        self.response_time_ms = Some(elapsed.as_millis() as u64);

        match outcome {
            Ok(()) => {
                self.consecutive_successes += 1;
                self.consecutive_failures = 0;
                self.last_success = Some(now);
                self.last_error = None;
                let recovered = matches!(
                    self.status,
                    HealthStatus::Unknown | HealthStatus::Healthy
                ) || self.consecutive_successes >= config.healthy_threshold;
                self.status = if elapsed > config.degraded_latency || !recovered {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
            }
            Err(err) => {
                self.consecutive_failures += 1;
                self.consecutive_successes = 0;
                self.total_failures += 1;
                self.last_error = Some(err.to_string());
                self.status = if self.consecutive_failures >= config.unhealthy_threshold {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Degraded
                };
            }
        }
    }
}

struct ServiceEntry {
    check: Arc<dyn HealthCheck>,
    info: ServiceHealthInfo,
}

struct MonitorInner {
    services: RwLock<HashMap<String, ServiceEntry>>,
    config: HealthCheckConfig,
    failure_detector: Option<Arc<FailureDetector>>,
}

impl MonitorInner {
    async fn check_service(&self, name: &str) -> Option<ServiceHealthInfo> {
        let check = {
            let services = self.services.read().await;
            Arc::clone(&services.get(name)?.check)
        };

        let started = Instant::now();
        let outcome = match time::timeout(self.config.check_timeout, check.check()).await {
            Ok(result) => result,
            Err(_) => Err(NetraError::Timeout(format!(
                "health check for '{}' timed out after {:?}",
                name, self.config.check_timeout
            ))),
        };
        let elapsed = started.elapsed();

        if let Err(err) = &outcome {
            error!(service = name, error = %err, "Health check failed");
            if let Some(detector) = &self.failure_detector {
                detector.record_error(name, err).await;
            }
        }

        let mut services = self.services.write().await;
        // Unregistered while the check was running
        let entry = services.get_mut(name)?;
        let previous = entry.info.status;
        entry.info.apply(&outcome, elapsed, &self.config);

        if previous != entry.info.status {
            match entry.info.status {
                HealthStatus::Healthy => info!(service = name, "Service is now healthy"),
                HealthStatus::Degraded => warn!(service = name, "Service is degraded"),
                HealthStatus::Unhealthy => warn!(service = name, "Service is now unhealthy"),
                HealthStatus::Unknown => {}
            }
        }
        Some(entry.info.clone())
    }

    async fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Polls registered health checks and keeps per-service health
pub struct ServiceHealthMonitor {
    inner: Arc<MonitorInner>,
    /// Cancel flag for the polling task
    cancel_flag: Arc<AtomicBool>,
}

impl fmt::Debug for ServiceHealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHealthMonitor")
            .field("config", &self.inner.config)
            .field("cancelled", &self.cancel_flag.load(Ordering::SeqCst))
            .finish()
    }
}

impl ServiceHealthMonitor {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                services: RwLock::new(HashMap::new()),
                config,
                failure_detector: None,
            }),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Forward every failed check to `detector`
    pub fn with_failure_detector(config: HealthCheckConfig, detector: Arc<FailureDetector>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                services: RwLock::new(HashMap::new()),
                config,
                failure_detector: Some(detector),
            }),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register (or replace) the check for `name`
    pub async fn register(&self, name: &str, check: Arc<dyn HealthCheck>) {
        let mut services = self.inner.services.write().await;
        services.insert(
            name.to_string(),
            ServiceEntry {
                check,
                info: ServiceHealthInfo::new(name),
            },
        );
        debug!(service = name, "Health check registered");
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.inner.services.write().await.remove(name).is_some()
    }

    /// Run one check now; `None` if `name` is not registered
    pub async fn check_service(&self, name: &str) -> Option<ServiceHealthInfo> {
        self.inner.check_service(name).await
    }

    pub async fn check_all(&self) -> Vec<ServiceHealthInfo> {
        let names = self.inner.service_names().await;
        let checks = names.iter().map(|name| self.inner.check_service(name));
        futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    pub async fn health(&self, name: &str) -> Option<ServiceHealthInfo> {
        let services = self.inner.services.read().await;
        services.get(name).map(|entry| entry.info.clone())
    }

    pub async fn all_health(&self) -> Vec<ServiceHealthInfo> {
        let services = self.inner.services.read().await;
        let mut infos: Vec<ServiceHealthInfo> =
            services.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Healthy, degraded and not-yet-checked services accept traffic
    pub async fn is_healthy(&self, name: &str) -> bool {
        match self.health(name).await {
            Some(info) => info.status != HealthStatus::Unhealthy,
            None => false,
        }
    }

    /// Worst status across all services, `Unknown` if none are registered
    pub async fn overall_status(&self) -> HealthStatus {
        let services = self.inner.services.read().await;
        services
            .values()
            .map(|entry| entry.info.status)
            .max_by_key(|status| status.severity())
            .unwrap_or(HealthStatus::Unknown)
    }

    /// Start the polling task
    pub fn start(&self) -> task::JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let cancel_flag = Arc::clone(&self.cancel_flag);
        cancel_flag.store(false, Ordering::SeqCst);

        task::spawn(async move {
            let mut interval_timer = time::interval(inner.config.check_interval);

            loop {
                interval_timer.tick().await;

                if cancel_flag.load(Ordering::SeqCst) {
                    break;
                }

                let names = inner.service_names().await;
                futures::future::join_all(names.iter().map(|name| inner.check_service(name)))
                    .await;
            }

            debug!("Health monitor task stopped");
        })
    }

    /// Stop the polling task after its current tick
    pub fn stop(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }
}

impl Drop for ServiceHealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
