use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub use crate::config::ResilienceConfig;
use crate::config::RedisConfig;
use crate::error::{NetraError, Result, StorageError};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::failure_detector::FailureDetector;
use crate::resilience::health_monitor::ServiceHealthMonitor;
use crate::resilience::retry_handler::RetryHandler;
use crate::storage::{MemoryStorage, RedisStorage, StorageBackend, StorageHealthCheck};

/// Name the primary backend is tracked under by the breaker, monitor and detector
pub const PRIMARY_SERVICE: &str = "redis";

/// Where operations are currently served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Primary is up and serving
    Redis,
    /// Primary exists but is unhealthy or its circuit is open
    Fallback,
    /// No primary was ever connected
    MemoryOnly,
}

/// Storage that prefers a primary backend (Redis) and falls back to memory
///
/// ```plaintext
/// ┌─────────────┐
/// │   Caller    │
/// └─────────────┘
///        │
///        ▼
/// ┌──────────────────┐      ┌────────────────┐
/// │ ResilientStorage │─────►│ Health Monitor │
/// └──────────────────┘      └────────────────┘
///        │
///        ├─── Circuit Breaker ── Retry ──► Redis
///        │
///        └─── on failure ───────────────► In-Memory
/// ```
///
/// Writes made during an outage land in memory. Reads consult memory when
/// the primary has no value, so those writes stay visible after recovery
/// until they expire.
#[derive(Debug)]
pub struct ResilientStorage<P: StorageBackend = RedisStorage> {
    primary: Option<Arc<P>>,
    memory: Arc<MemoryStorage>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryHandler,
    health_monitor: Arc<ServiceHealthMonitor>,
    failure_detector: Arc<FailureDetector>,
}

impl ResilientStorage<RedisStorage> {
    /// Connect to Redis, running memory-only if the first connection fails
    pub async fn connect(
        redis_config: RedisConfig,
        resilience_config: ResilienceConfig,
    ) -> Result<Self> {
        let redis = match RedisStorage::new(redis_config.clone()).await {
            Ok(redis) => Some(Arc::new(redis)),
            Err(e) => {
                warn!(
                    url = %redis_config.url,
                    error = %e,
                    "Redis unavailable, sessions will be kept in memory"
                );
                None
            }
        };
        Self::with_primary(redis, resilience_config).await
    }
}

impl<P: StorageBackend + 'static> ResilientStorage<P> {
    /// Wrap `primary`; `None` serves everything from memory
    pub async fn with_primary(
        primary: Option<Arc<P>>,
        resilience_config: ResilienceConfig,
    ) -> Result<Self> {
        resilience_config.validate()?;

        let memory = Arc::new(MemoryStorage::new(resilience_config.memory_config.clone()));
        let failure_detector = Arc::new(FailureDetector::new(
            resilience_config.failure_detector.clone(),
        ));
        let health_monitor = Arc::new(ServiceHealthMonitor::with_failure_detector(
            resilience_config.health_check.clone(),
            Arc::clone(&failure_detector),
        ));
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            PRIMARY_SERVICE,
            resilience_config.circuit_breaker.clone(),
        ));
        let retry = RetryHandler::new(resilience_config.retry.clone());

        if let Some(primary) = &primary {
            health_monitor
                .register(
                    PRIMARY_SERVICE,
                    Arc::new(StorageHealthCheck(Arc::clone(primary))),
                )
                .await;
            health_monitor.start();
        }

        Ok(Self {
            primary,
            memory,
            circuit_breaker,
            retry,
            health_monitor,
            failure_detector,
        })
    }

    /// Memory-only storage with the same interface
    pub async fn memory_only(resilience_config: ResilienceConfig) -> Result<Self> {
        Self::with_primary(None, resilience_config).await
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn health_monitor(&self) -> &Arc<ServiceHealthMonitor> {
        &self.health_monitor
    }

    pub fn failure_detector(&self) -> &Arc<FailureDetector> {
        &self.failure_detector
    }

    pub fn memory(&self) -> &Arc<MemoryStorage> {
        &self.memory
    }

    pub async fn mode(&self) -> StorageMode {
        if self.primary.is_none() {
            return StorageMode::MemoryOnly;
        }
        let circuit_open = self.circuit_breaker.get_state().await == CircuitState::Open;
        if circuit_open || !self.health_monitor.is_healthy(PRIMARY_SERVICE).await {
            StorageMode::Fallback
        } else {
            StorageMode::Redis
        }
    }

    /// Run `redis_fn` against the primary behind the health gate, the
    /// circuit breaker and the retry handler.
    async fn try_primary<T, F, Fut>(&self, operation: &str, key: &str, redis_fn: F) -> Result<T>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(primary) = &self.primary else {
            return Err(NetraError::Storage(StorageError::RedisConnection(
                "no primary storage configured".to_string(),
            )));
        };

        if !self.health_monitor.is_healthy(PRIMARY_SERVICE).await {
            debug!(operation, key, "Skipping primary storage, health check failing");
            return Err(NetraError::Storage(StorageError::RedisConnection(format!(
                "primary unhealthy for operation '{}'",
                operation
            ))));
        }

        let started = Instant::now();
        let result = self
            .circuit_breaker
            .call(|| {
                self.retry
                    .execute(operation, || redis_fn(Arc::clone(primary)))
            })
            .await;
        crate::storage_op!(operation, key, result, started.elapsed().as_millis() as u64);

        if let Err(err) = &result {
            if !matches!(err, NetraError::CircuitOpen(_)) {
                self.failure_detector.record_error(PRIMARY_SERVICE, err).await;
            }
            debug!(operation, key, error = %err, "Primary storage failed, using fallback");
        }
        result
    }
}

#[async_trait]
impl<P: StorageBackend + 'static> StorageBackend for ResilientStorage<P> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self
            .try_primary("get", key, |p| async move { p.get(key).await })
            .await
        {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) | Err(_) => self.memory.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        match self
            .try_primary("set", key, |p| async move { p.set(key, value, ttl).await })
            .await
        {
            Ok(()) => {
                // Drop any stale copy written during an outage
                self.memory.delete(key).await?;
                Ok(())
            }
            Err(_) => self.memory.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let in_memory = self.memory.delete(key).await?;
        match self
            .try_primary("delete", key, |p| async move { p.delete(key).await })
            .await
        {
            Ok(in_primary) => Ok(in_primary || in_memory),
            Err(_) => Ok(in_memory),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .try_primary("exists", key, |p| async move { p.exists(key).await })
            .await
        {
            Ok(true) => Ok(true),
            Ok(false) | Err(_) => self.memory.exists(key).await,
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let in_memory = self.memory.expire(key, ttl).await?;
        match self
            .try_primary("expire", key, |p| async move { p.expire(key, ttl).await })
            .await
        {
            Ok(in_primary) => Ok(in_primary || in_memory),
            Err(_) => Ok(in_memory),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        match self
            .try_primary("set_add", key, |p| async move { p.set_add(key, member).await })
            .await
        {
            Ok(added) => Ok(added),
            Err(_) => self.memory.set_add(key, member).await,
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let in_memory = self.memory.set_remove(key, member).await?;
        match self
            .try_primary("set_remove", key, |p| async move {
                p.set_remove(key, member).await
            })
            .await
        {
            Ok(in_primary) => Ok(in_primary || in_memory),
            Err(_) => Ok(in_memory),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut members = self.memory.set_members(key).await?;
        if let Ok(primary_members) = self
            .try_primary("set_members", key, |p| async move { p.set_members(key).await })
            .await
        {
            members.extend(primary_members);
            members.sort();
            members.dedup();
        }
        Ok(members)
    }

    async fn ping(&self) -> Result<()> {
        // The memory fallback keeps the store usable even without a primary
        self.memory.ping().await
    }
}
