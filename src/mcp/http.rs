use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::McpClientConfig;
use crate::error::{NetraError, Result};
use crate::mcp::jsonrpc::{
    IdGenerator, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::mcp::transport::McpTransport;
use crate::resilience::{CircuitBreaker, RetryHandler};

/// Header servers use to pin a client to a session
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Build the static headers sent with every request
pub(crate) fn default_headers(config: &McpClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(token) = &config.auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| NetraError::Config(format!("invalid auth token: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| NetraError::Config(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| NetraError::Config(format!("invalid header value for '{}': {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Pull the JSON messages out of a `text/event-stream` body
pub(crate) fn sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();
    for line in body.lines().chain(std::iter::once("")) {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.is_empty() && !data.is_empty() {
            if let Ok(value) = serde_json::from_str(&data) {
                messages.push(value);
            }
            data.clear();
        }
    }
    messages
}

/// The event answering `expected`; server requests and notifications in the
/// same stream are skipped
pub(crate) fn sse_reply(messages: Vec<Value>, expected: &RequestId) -> Option<Value> {
    messages.into_iter().find(|message| {
        let answers = message.get("result").is_some() || message.get("error").is_some();
        let id = message
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
        answers && id.as_ref() == Some(expected)
    })
}

/// MCP over HTTP POST, one JSON-RPC message per request
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: McpClientConfig,
    ids: IdGenerator,
    connected: AtomicBool,
    session_id: RwLock<Option<String>>,
    retry: RetryHandler,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpTransport {
    pub fn new(config: McpClientConfig) -> Result<Self> {
        config.validate()?;
        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(NetraError::Config(format!(
                "HTTP transport needs an http(s) url, got '{}'",
                config.url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|e| NetraError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retry: RetryHandler::new(config.retry.clone()),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                format!("mcp:{}", config.url),
                config.circuit_breaker.clone(),
            )),
            config,
            ids: IdGenerator::default(),
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
        })
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(NetraError::Connection(
                "HTTP transport is not connected".to_string(),
            ));
        }
        Ok(())
    }

    /// POST one message; `None` when the server accepted it without a body.
    /// `expected` is the id of the request being sent, if any.
    async fn post(&self, body: &Value, expected: Option<&RequestId>) -> Result<Option<Value>> {
        let mut request = self
            .client
            .post(&self.config.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session_id) = self.session_id.read().await.as_deref() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await?;
        let status = response.status();

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(session_id) {
                debug!(session_id, "MCP server assigned session");
                *current = Some(session_id.to_string());
            }
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(NetraError::Connection(format!(
                "MCP server returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(NetraError::Protocol(format!(
                "MCP server returned {}",
                status
            )));
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }

        if is_event_stream {
            return Ok(expected.and_then(|id| sse_reply(sse_messages(&text), id)));
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| NetraError::Protocol(format!("invalid JSON from MCP server: {}", e)))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!(url = %self.config.url, "MCP HTTP transport ready");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.session_id.write().await.take();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_connected()?;
        let id = self.ids.next_id();
        let body = serde_json::to_value(JsonRpcRequest::new(id.clone(), method, params))?;

        // Malformed replies count against the breaker, JSON-RPC errors do not
        self.circuit_breaker
            .call(|| async {
                let reply = self
                    .retry
                    .execute(method, || self.post(&body, Some(&id)))
                    .await?;
                let Some(reply) = reply else {
                    return Err(NetraError::Protocol(format!(
                        "no response body for request '{}'",
                        method
                    )));
                };
                JsonRpcResponse::from_value(reply)?.into_result(&id)
            })
            .await
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_connected()?;
        let body = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.circuit_breaker
            .call(|| self.retry.execute(method, || self.post(&body, None)))
            .await?;
        Ok(())
    }
}
