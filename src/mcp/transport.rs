use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::mcp::jsonrpc::JsonRpcNotification;

/// A channel that carries JSON-RPC messages to an MCP server
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Open the underlying connection; a no-op when already connected
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Send a request and wait for its `result`, mapping a JSON-RPC error
    /// object to [`crate::NetraError::Rpc`]
    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value>;

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// Server-initiated notifications, when the transport can receive them
    fn subscribe(&self) -> Option<broadcast::Receiver<JsonRpcNotification>> {
        None
    }
}

#[async_trait]
impl<T: McpTransport + ?Sized> McpTransport for Box<T> {
    async fn connect(&self) -> Result<()> {
        (**self).connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn is_connected(&self) -> bool {
        (**self).is_connected().await
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        (**self).send_request(method, params).await
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        (**self).send_notification(method, params).await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<JsonRpcNotification>> {
        (**self).subscribe()
    }
}
