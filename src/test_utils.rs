// src/test_utils.rs

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::{InMemoryConfig, RedisConfig};
use crate::error::{NetraError, Result, StorageError};
use crate::storage::{MemoryStorage, RedisStorage, StorageBackend};

fn simulated_failure() -> NetraError {
    NetraError::Storage(StorageError::RedisConnection(
        "Simulated failure".to_string(),
    ))
}

/// Memory storage without the background cleanup task
pub fn memory_storage() -> MemoryStorage {
    MemoryStorage::new(InMemoryConfig {
        use_background_task: false,
        ..InMemoryConfig::default()
    })
}

/// Storage backend whose calls can be made to fail on demand
#[derive(Debug)]
pub struct MockStorage {
    inner: MemoryStorage,
    failing: AtomicBool,
    fail_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            inner: memory_storage(),
            failing: AtomicBool::new(false),
            fail_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every call until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only the next `n` calls
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The data as stored, bypassing failure injection
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(simulated_failure());
        }
        let consumed = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(simulated_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.check()?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        self.check()?;
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.set_members(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// Operation that fails a fixed number of times before succeeding
pub struct FlakyOperation {
    failures_before_success: usize,
    calls: AtomicUsize,
    error: fn() -> NetraError,
}

impl FlakyOperation {
    pub fn new(failures_before_success: usize, error: fn() -> NetraError) -> Self {
        Self {
            failures_before_success,
            calls: AtomicUsize::new(0),
            error,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the 1-based attempt number on success
    pub async fn call(&self) -> Result<usize> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures_before_success {
            Err((self.error)())
        } else {
            Ok(attempt)
        }
    }
}

/// Connects to the local Redis used by integration tests, `None` if absent
pub async fn local_redis() -> Option<RedisStorage> {
    let config = RedisConfig {
        connection_timeout: Duration::from_millis(500),
        ..RedisConfig::default()
    };
    match RedisStorage::new(config).await {
        Ok(redis) => Some(redis),
        Err(e) => {
            eprintln!("Skipping Redis test, no server available: {}", e);
            None
        }
    }
}

/// Answers MCP requests the way a small tool server would
pub fn mcp_stub_reply(message: &Value) -> Option<Value> {
    let id = message.get("id").filter(|id| !id.is_null())?.clone();
    let method = message.get("method").and_then(Value::as_str).unwrap_or("");
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {}, "resources": {} },
            "serverInfo": { "name": "stub-server", "version": "1.0.0" }
        }),
        "tools/list" => match params.get("cursor").and_then(Value::as_str) {
            None => json!({
                "tools": [{ "name": "echo", "description": "Echo text", "inputSchema": { "type": "object" } }],
                "nextCursor": "page-2"
            }),
            Some(_) => json!({
                "tools": [{ "name": "add", "inputSchema": { "type": "object" } }]
            }),
        },
        "tools/call" => match params.get("name").and_then(Value::as_str) {
            Some("echo") => json!({
                "content": [{ "type": "text", "text": params["arguments"]["text"].clone() }],
                "isError": false
            }),
            Some("fail") => json!({
                "content": [{ "type": "text", "text": "tool failed" }],
                "isError": true
            }),
            _ => {
                return Some(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32602, "message": "Unknown tool" }
                }))
            }
        },
        "resources/list" => json!({
            "resources": [{ "uri": "file:///notes.txt", "name": "notes", "mimeType": "text/plain" }]
        }),
        "resources/read" => json!({
            "contents": [{ "uri": params["uri"].clone(), "text": "hello" }]
        }),
        "prompts/list" => json!({
            "prompts": [{ "name": "summarize", "description": "Summarize text" }]
        }),
        "ping" => json!({}),
        // Never answered, used to exercise request timeouts
        "hang" => return None,
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {}", other) }
            }))
        }
    };
    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

pub type HttpHandler = Arc<dyn Fn(Value) -> (u16, Option<Value>) + Send + Sync>;

/// A request as the HTTP stub received it; header names are lowercase
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub enum StubReply {
    Json(u16, Option<Value>),
    /// 200 with one `message` event per value
    EventStream(Vec<Value>),
}

pub type HttpExchangeHandler = Arc<dyn Fn(StubRequest) -> StubReply + Send + Sync>;

/// Minimal HTTP/1.1 server answering one request per connection
pub async fn spawn_http_stub(handler: HttpHandler) -> (String, JoinHandle<()>) {
    spawn_http_exchange_stub(Arc::new(move |request: StubRequest| {
        let (status, body) = handler(request.body);
        StubReply::Json(status, body)
    }))
    .await
}

/// Like [`spawn_http_stub`], with access to request headers and SSE replies
pub async fn spawn_http_exchange_stub(handler: HttpExchangeHandler) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/mcp", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let _ = serve_http(stream, handler).await;
            });
        }
    });
    (url, handle)
}

async fn serve_http(mut stream: TcpStream, handler: HttpExchangeHandler) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let headers: HashMap<String, String> = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let end = buf.len().min(header_end + content_length);
    let body: Value = serde_json::from_slice(&buf[header_end..end]).unwrap_or(Value::Null);
    let (status, content_type, body) = match handler(StubRequest { headers, body }) {
        StubReply::Json(status, body) => (
            status,
            "application/json",
            body.map(|b| b.to_string()).unwrap_or_default(),
        ),
        StubReply::EventStream(events) => (
            200,
            "text/event-stream",
            events
                .iter()
                .map(|event| format!("event: message\ndata: {}\n\n", event))
                .collect(),
        ),
    };
    let response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nMcp-Session-Id: stub-session\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

pub type WsHandler = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;

/// WebSocket server that replies to each text frame with `handler`'s answer
pub async fn spawn_ws_stub(handler: WsHandler) -> (String, JoinHandle<()>) {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(frame)) = ws.next().await {
                    match frame {
                        Message::Text(text) => {
                            let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                                continue;
                            };
                            if let Some(reply) = handler(request) {
                                if ws.send(Message::text(reply.to_string())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });
    (url, handle)
}
