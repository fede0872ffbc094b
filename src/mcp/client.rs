use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::McpClientConfig;
use crate::error::{NetraError, Result};
use crate::mcp::http::HttpTransport;
use crate::mcp::transport::McpTransport;
use crate::mcp::websocket::WebSocketTransport;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name and version exchanged during initialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Default for Implementation {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Implementation,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpPrompt {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// Pick the transport from the url scheme
pub fn transport_for(config: McpClientConfig) -> Result<Box<dyn McpTransport>> {
    if config.url.starts_with("ws://") || config.url.starts_with("wss://") {
        Ok(Box::new(WebSocketTransport::new(config)?))
    } else if config.url.starts_with("http://") || config.url.starts_with("https://") {
        Ok(Box::new(HttpTransport::new(config)?))
    } else {
        Err(NetraError::Config(format!(
            "unsupported MCP url scheme: '{}'",
            config.url
        )))
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| NetraError::Protocol(format!("malformed {}: {}", what, e)))
}

/// MCP client over any [`McpTransport`]
#[derive(Debug)]
pub struct McpClient<T: McpTransport = Box<dyn McpTransport>> {
    transport: T,
    client_info: Implementation,
    server: RwLock<Option<InitializeResult>>,
}

impl McpClient {
    /// Client for `config.url`, choosing HTTP or WebSocket by scheme
    pub fn from_config(config: McpClientConfig) -> Result<Self> {
        Ok(Self::new(transport_for(config)?))
    }
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            client_info: Implementation::default(),
            server: RwLock::new(None),
        }
    }

    pub fn with_client_info(mut self, client_info: Implementation) -> Self {
        self.client_info = client_info;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// What the server reported during [`McpClient::initialize`]
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.server.read().await.is_some()
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if !self.is_initialized().await {
            return Err(NetraError::Validation(
                "MCP client is not initialized".to_string(),
            ));
        }
        Ok(())
    }

    /// Connect and run the initialize handshake
    pub async fn initialize(&self) -> Result<InitializeResult> {
        self.transport.connect().await?;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": false },
                "sampling": {}
            },
            "clientInfo": self.client_info,
        });
        let result: InitializeResult =
            decode(self.transport.send_request("initialize", Some(params)).await?, "initialize result")?;

        if result.protocol_version != PROTOCOL_VERSION {
            debug!(
                server = %result.protocol_version,
                client = PROTOCOL_VERSION,
                "MCP server negotiated a different protocol version"
            );
        }

        self.transport
            .send_notification("notifications/initialized", None)
            .await?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP session initialized"
        );
        *self.server.write().await = Some(result.clone());
        Ok(result)
    }

    /// Follow `nextCursor` until the server stops returning one
    async fn list_paginated<I: DeserializeOwned>(&self, method: &str, field: &str) -> Result<Vec<I>> {
        self.ensure_initialized().await?;

        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut page = self.transport.send_request(method, params).await?;

            let batch = page
                .get_mut(field)
                .map(Value::take)
                .ok_or_else(|| NetraError::Protocol(format!("{} result has no '{}'", method, field)))?;
            items.extend(decode::<Vec<I>>(batch, field)?);

            match page.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => return Ok(items),
            }
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.list_paginated("tools/list", "tools").await
    }

    /// A tool that ran but failed comes back with `is_error` set, not as `Err`
    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolCallResult> {
        if name.trim().is_empty() {
            return Err(NetraError::Validation("tool name must not be empty".to_string()));
        }
        self.ensure_initialized().await?;
        let result = self
            .transport
            .send_request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        decode(result, "tool result")
    }

    pub async fn list_resources(&self) -> Result<Vec<McpResource>> {
        self.list_paginated("resources/list", "resources").await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<Value>> {
        if uri.trim().is_empty() {
            return Err(NetraError::Validation("resource uri must not be empty".to_string()));
        }
        self.ensure_initialized().await?;
        let mut result = self
            .transport
            .send_request("resources/read", Some(json!({ "uri": uri })))
            .await?;
        let contents = result
            .get_mut("contents")
            .map(Value::take)
            .unwrap_or_else(|| Value::Array(Vec::new()));
        decode(contents, "resource contents")
    }

    pub async fn list_prompts(&self) -> Result<Vec<McpPrompt>> {
        self.list_paginated("prompts/list", "prompts").await
    }

    pub async fn ping(&self) -> Result<()> {
        self.transport.send_request("ping", None).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.server.write().await.take();
        self.transport.disconnect().await
    }
}
