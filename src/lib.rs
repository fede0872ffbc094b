// library entry
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod mcp;
pub mod resilience;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export key components for convenience
pub use config::NetraConfig;
pub use error::{ErrorClass, NetraError, Result, StorageError};
pub use events::{AgentEvent, WebSocketMessage};
pub use logging::init as init_logging;
pub use mcp::{McpClient, McpTransport};
pub use resilience::{CircuitBreaker, ResilientStorage, RetryHandler, ServiceHealthMonitor};
pub use session::{RedisSessionManager, Session};
pub use storage::StorageBackend;
