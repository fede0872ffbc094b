// for error definitions
use redis;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum NetraError {
    /// The remote side could not be reached or dropped the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// An operation did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The peer answered with something that is not valid JSON-RPC
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Caller supplied invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// The peer answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Call rejected because the named circuit breaker is open
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// Errors related to the storage backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Session lookups and lifecycle errors
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// Key not found in storage
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// In-memory store is full
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
}

/// Coarse classification used by retry and failure tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Connection,
    Timeout,
    Protocol,
    Validation,
    Other,
}

impl NetraError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NetraError::Connection(_) => ErrorClass::Connection,
            NetraError::Timeout(_) => ErrorClass::Timeout,
            NetraError::Protocol(_) | NetraError::Rpc { .. } => ErrorClass::Protocol,
            NetraError::Validation(_) | NetraError::Config(_) => ErrorClass::Validation,
            NetraError::Storage(StorageError::RedisConnection(_)) => ErrorClass::Connection,
            NetraError::Storage(StorageError::Serialization(_)) => ErrorClass::Protocol,
            NetraError::CircuitOpen(_)
            | NetraError::Storage(_)
            | NetraError::Session(_)
            | NetraError::Internal(_) => ErrorClass::Other,
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Connection | ErrorClass::Timeout)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for NetraError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                NetraError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                NetraError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            _ => NetraError::Storage(StorageError::RedisCommand(err.to_string())),
        }
    }
}

// implement conversions from serde_json::Error to NetraError
impl From<serde_json::Error> for NetraError {
    fn from(err: serde_json::Error) -> Self {
        NetraError::Storage(StorageError::Serialization(err.to_string()))
    }
}

impl From<reqwest::Error> for NetraError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetraError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            NetraError::Connection(err.to_string())
        } else if err.is_decode() {
            NetraError::Protocol(err.to_string())
        } else {
            NetraError::Internal(err.to_string())
        }
    }
}

impl From<tungstenite::Error> for NetraError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Protocol(e) => NetraError::Protocol(e.to_string()),
            tungstenite::Error::Url(e) => NetraError::Validation(e.to_string()),
            other => NetraError::Connection(other.to_string()),
        }
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, NetraError>;
