// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{NetraError, Result};

/// Configuration for a circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Time since the last failure before a trial call is allowed
    #[serde(default = "default_recovery_timeout", with = "duration_serde")]
    pub recovery_timeout: Duration,

    /// Consecutive half-open successes needed to close the circuit
    #[serde(default = "default_success_threshold")]
    pub success_threshold: usize,

    /// Concurrent trial calls admitted while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: usize,
}

fn default_failure_threshold() -> usize {
    5
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_success_threshold() -> usize {
    1
}

fn default_half_open_max_calls() -> usize {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(NetraError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 || self.half_open_max_calls == 0 {
            return Err(NetraError::Config(
                "success_threshold and half_open_max_calls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for retry strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Growth factor per attempt
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Shave up to 25% off each delay at random
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> usize {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_delay < self.base_delay {
            return Err(NetraError::Config(format!(
                "max_delay {:?} is shorter than base_delay {:?}",
                self.max_delay, self.base_delay
            )));
        }
        if self.exponential_base.is_nan() || self.exponential_base < 1.0 {
            return Err(NetraError::Config(format!(
                "exponential_base must be >= 1.0, got {}",
                self.exponential_base
            )));
        }
        Ok(())
    }
}

/// Configuration for health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// How often registered services are polled
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// Timeout for a single health check
    #[serde(default = "default_check_timeout", with = "duration_serde")]
    pub check_timeout: Duration,

    /// Consecutive failures before a service is unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Consecutive successes before a failing service is healthy again
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,

    /// Checks slower than this mark the service degraded
    #[serde(default = "default_degraded_latency", with = "duration_serde")]
    pub degraded_latency: Duration,
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_healthy_threshold() -> u32 {
    2
}

fn default_degraded_latency() -> Duration {
    Duration::from_millis(500)
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            check_timeout: default_check_timeout(),
            unhealthy_threshold: default_unhealthy_threshold(),
            healthy_threshold: default_healthy_threshold(),
            degraded_latency: default_degraded_latency(),
        }
    }
}

impl HealthCheckConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() || self.check_timeout.is_zero() {
            return Err(NetraError::Config(
                "check_interval and check_timeout must be greater than zero".to_string(),
            ));
        }
        if self.unhealthy_threshold == 0 || self.healthy_threshold == 0 {
            return Err(NetraError::Config(
                "unhealthy_threshold and healthy_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for failure pattern detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetectorConfig {
    /// Events kept in history
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Window considered when grouping failures into patterns
    #[serde(default = "default_pattern_window", with = "duration_serde")]
    pub pattern_window: Duration,

    /// Occurrences within the window that make a pattern
    #[serde(default = "default_pattern_threshold")]
    pub pattern_threshold: usize,

    /// Failures per minute above which a service counts as degraded
    #[serde(default = "default_degraded_failure_rate")]
    pub degraded_failure_rate: f64,
}

fn default_max_events() -> usize {
    1_000
}

fn default_pattern_window() -> Duration {
    Duration::from_secs(300)
}

fn default_pattern_threshold() -> usize {
    3
}

fn default_degraded_failure_rate() -> f64 {
    5.0
}

impl Default for FailureDetectorConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            pattern_window: default_pattern_window(),
            pattern_threshold: default_pattern_threshold(),
            degraded_failure_rate: default_degraded_failure_rate(),
        }
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connection_timeout: default_conn_timeout(),
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

impl InMemoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(NetraError::Config("max_entries must be at least 1".to_string()));
        }
        if self.use_background_task && self.cleanup_interval.is_zero() {
            return Err(NetraError::Config(
                "cleanup_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session lifetime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl", with = "duration_serde")]
    pub session_ttl: Duration,

    #[serde(default = "default_demo_session_ttl", with = "duration_serde")]
    pub demo_session_ttl: Duration,

    /// Oldest sessions are evicted past this count
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(60 * 60 * 24)
}

fn default_demo_session_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_max_sessions_per_user() -> usize {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: default_session_ttl(),
            demo_session_ttl: default_demo_session_ttl(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl.is_zero() || self.demo_session_ttl.is_zero() {
            return Err(NetraError::Config(
                "session_ttl and demo_session_ttl must be greater than zero".to_string(),
            ));
        }
        if self.max_sessions_per_user == 0 {
            return Err(NetraError::Config(
                "max_sessions_per_user must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings shared by the MCP transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpClientConfig {
    /// `http(s)://` or `ws(s)://` endpoint
    pub url: String,

    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Sent as `Authorization: Bearer ...`
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

impl McpClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            auth_token: None,
            headers: HashMap::new(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(NetraError::Config("MCP url must not be empty".to_string()));
        }
        self.retry.validate()?;
        self.circuit_breaker.validate()
    }
}

/// Combined configuration for resilience features
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub failure_detector: FailureDetectorConfig,
    /// In-memory storage configuration (for fallback)
    #[serde(default)]
    pub memory_config: InMemoryConfig,
}

impl ResilienceConfig {
    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.health_check.validate()?;
        self.memory_config.validate()
    }
}

/// Root configuration for the service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetraConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub mcp: Option<McpClientConfig>,
}

impl NetraConfig {
    /// Parse from a JSON document; missing sections take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: NetraConfig = serde_json::from_str(raw)
            .map_err(|e| NetraError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables (call `dotenv` first).
    pub fn from_env() -> Result<Self> {
        let mut config = NetraConfig::default();

        if let Ok(url) = env::var("REDIS_URL") {
            config.redis.url = url;
        }
        if let Some(ms) = env_u64("NETRA_REDIS_TIMEOUT_MS")? {
            config.redis.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("NETRA_CB_FAILURE_THRESHOLD")? {
            config.resilience.circuit_breaker.failure_threshold = n as usize;
        }
        if let Some(ms) = env_u64("NETRA_CB_RECOVERY_TIMEOUT_MS")? {
            config.resilience.circuit_breaker.recovery_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("NETRA_RETRY_MAX_RETRIES")? {
            config.resilience.retry.max_retries = n as usize;
        }
        if let Some(ms) = env_u64("NETRA_RETRY_BASE_DELAY_MS")? {
            config.resilience.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("NETRA_SESSION_TTL_SECS")? {
            config.session.session_ttl = Duration::from_secs(secs);
        }
        if let Ok(url) = env::var("NETRA_MCP_URL") {
            let mut mcp = McpClientConfig::new(url);
            mcp.auth_token = env::var("NETRA_MCP_TOKEN").ok();
            config.mcp = Some(mcp);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redis.url.trim().is_empty() {
            return Err(NetraError::Config("redis url must not be empty".to_string()));
        }
        self.resilience.validate()?;
        self.session.validate()?;
        if let Some(mcp) = &self.mcp {
            mcp.validate()?;
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| NetraError::Config(format!("{} must be an integer: {}", name, e))),
        Err(_) => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
