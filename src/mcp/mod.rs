// src/mcp/mod.rs
//! Model Context Protocol client.
//!
//! JSON-RPC 2.0 over either HTTP POST or a WebSocket. Both transports run
//! requests through a circuit breaker; HTTP additionally retries transient
//! failures, WebSocket retries only the connection handshake.

mod client;
mod http;
pub mod jsonrpc;
mod transport;
mod websocket;

#[cfg(test)]
mod tests;

pub use client::{
    transport_for, Implementation, InitializeResult, McpClient, McpPrompt, McpResource, McpTool,
    ToolCallResult, PROTOCOL_VERSION,
};
pub use http::{HttpTransport, SESSION_HEADER};
pub use jsonrpc::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use transport::McpTransport;
pub use websocket::WebSocketTransport;
