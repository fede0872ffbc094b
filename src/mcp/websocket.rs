use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::McpClientConfig;
use crate::error::{NetraError, Result};
use crate::mcp::jsonrpc::{
    IdGenerator, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, METHOD_NOT_FOUND,
};
use crate::mcp::transport::McpTransport;
use crate::resilience::{CircuitBreaker, RetryHandler};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type PendingMap = HashMap<RequestId, oneshot::Sender<Result<Value>>>;

const NOTIFICATION_BUFFER: usize = 64;

/// State shared between the transport and its reader task
struct Shared {
    /// Sink of the live connection, tagged with the generation that opened it
    writer: Mutex<Option<(u64, WsSink)>>,
    generation: AtomicU64,
    pending: Mutex<PendingMap>,
    connected: AtomicBool,
    notifications: broadcast::Sender<JsonRpcNotification>,
}

impl Shared {
    async fn send_text(&self, text: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some((_, sink)) = writer.as_mut() else {
            return Err(NetraError::Connection(
                "WebSocket is not connected".to_string(),
            ));
        };
        sink.send(Message::text(text)).await.map_err(NetraError::from)
    }

    /// Tear down after the reader of `generation` stopped. A reader that
    /// outlived its connection leaves a newer one alone; returns whether
    /// anything was torn down.
    async fn connection_lost(&self, generation: u64) -> bool {
        let mut writer = self.writer.lock().await;
        if !matches!(writer.as_ref(), Some((current, _)) if *current == generation) {
            debug!(generation, "Reader of a replaced connection exited");
            return false;
        }
        writer.take();
        self.connected.store(false, Ordering::SeqCst);
        drop(writer);
        self.fail_pending("WebSocket connection closed").await;
        true
    }

    async fn fail_pending(&self, reason: &str) {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), reason, "Failing in-flight MCP requests");
        }
        for (_, sender) in drained {
            let _ = sender.send(Err(NetraError::Connection(reason.to_string())));
        }
    }

    async fn dispatch(&self, text: &str) {
        let messages = match IncomingMessage::parse_all(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Discarding malformed MCP message");
                return;
            }
        };

        for message in messages {
            match message {
                IncomingMessage::Response(response) => {
                    let Some(id) = response.id.clone() else {
                        warn!(payload = ?response.payload, "MCP error response without an id");
                        continue;
                    };
                    match self.pending.lock().await.remove(&id) {
                        Some(sender) => {
                            let _ = sender.send(response.into_result(&id));
                        }
                        None => debug!(%id, "Response for unknown or expired request"),
                    }
                }
                IncomingMessage::Notification(notification) => {
                    debug!(method = %notification.method, "MCP notification");
                    // No subscribers is fine
                    let _ = self.notifications.send(notification);
                }
                IncomingMessage::Request(request) => {
                    let reply = server_request_reply(&request);
                    if let Err(e) = self.send_text(reply.to_value().to_string()).await {
                        warn!(method = %request.method, error = %e, "Failed to answer server request");
                    }
                }
            }
        }
    }
}

/// Servers may ping the client; anything else is unsupported
fn server_request_reply(request: &JsonRpcRequest) -> JsonRpcResponse {
    if request.method == "ping" {
        JsonRpcResponse::success(request.id.clone(), json!({}))
    } else {
        JsonRpcResponse::failure(
            Some(request.id.clone()),
            JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {}", request.method),
                data: None,
            },
        )
    }
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<WsStream>, generation: u64) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => shared.dispatch(text).await,
                Err(_) => warn!(len = bytes.len(), "Ignoring non UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                info!(?frame, "MCP server closed the WebSocket");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    shared.connection_lost(generation).await;
}

/// MCP over a persistent WebSocket.
///
/// Responses are matched to requests by id, so calls may run concurrently.
/// A dropped connection is reopened with backoff on the next request unless
/// [`McpTransport::disconnect`] was called.
pub struct WebSocketTransport {
    config: McpClientConfig,
    shared: Arc<Shared>,
    ids: IdGenerator,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    connect_lock: Mutex<()>,
    reconnect: AtomicBool,
    retry: RetryHandler,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.config.url)
            .field("connected", &self.shared.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    pub fn new(config: McpClientConfig) -> Result<Self> {
        config.validate()?;
        if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
            return Err(NetraError::Config(format!(
                "WebSocket transport needs a ws(s) url, got '{}'",
                config.url
            )));
        }

        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Ok(Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(None),
                generation: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                connected: AtomicBool::new(false),
                notifications,
            }),
            ids: IdGenerator::default(),
            reader: std::sync::Mutex::new(None),
            connect_lock: Mutex::new(()),
            reconnect: AtomicBool::new(false),
            retry: RetryHandler::new(config.retry.clone()),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                format!("mcp:{}", config.url),
                config.circuit_breaker.clone(),
            )),
            config,
        })
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Requests still waiting for a response
    pub async fn pending_requests(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    fn replace_reader(&self, handle: Option<JoinHandle<()>>) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(old) = std::mem::replace(&mut *reader, handle) {
                old.abort();
            }
        }
    }

    /// One connection attempt
    async fn open(&self) -> Result<()> {
        let mut request = self.config.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        if let Some(token) = &self.config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| NetraError::Config(format!("invalid auth token: {}", e)))?;
            headers.insert("authorization", value);
        }
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                NetraError::Config(format!("invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                NetraError::Config(format!("invalid header value for '{}': {}", name, e))
            })?;
            headers.insert(name, value);
        }

        let (stream, response) = time::timeout(self.config.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                NetraError::Timeout(format!(
                    "WebSocket connect to {} timed out after {:?}",
                    self.config.url, self.config.connect_timeout
                ))
            })??;

        let (sink, source) = stream.split();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut writer = self.shared.writer.lock().await;
            *writer = Some((generation, sink));
            self.shared.connected.store(true, Ordering::SeqCst);
        }
        self.replace_reader(Some(tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            source,
            generation,
        ))));

        info!(url = %self.config.url, status = %response.status(), "MCP WebSocket connected");
        Ok(())
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.reconnect.load(Ordering::SeqCst) {
            return Err(NetraError::Connection(
                "WebSocket transport is not connected".to_string(),
            ));
        }
        info!(url = %self.config.url, "Reconnecting MCP WebSocket");
        self.connect().await
    }

    async fn request_once(&self, id: RequestId, payload: String) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.shared.send_text(payload).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        match time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetraError::Connection(
                "connection closed before a response arrived".to_string(),
            )),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                Err(NetraError::Timeout(format!(
                    "request {} timed out after {:?}",
                    id, self.config.request_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl McpTransport for WebSocketTransport {
    async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.retry.execute("mcp_ws_connect", || self.open()).await?;
        self.reconnect.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.reconnect.store(false, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);

        let sink = self.shared.writer.lock().await.take();
        if let Some((_, mut sink)) = sink {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!(error = %e, "Close frame not delivered");
            }
            let _ = sink.close().await;
        }
        self.replace_reader(None);
        self.shared.fail_pending("transport disconnected").await;
        info!(url = %self.config.url, "MCP WebSocket disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.ensure_connected().await?;
        let id = self.ids.next_id();
        let payload = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;
        debug!(method, %id, "Sending MCP request");
        self.circuit_breaker
            .call(|| self.request_once(id, payload))
            .await
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.ensure_connected().await?;
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.shared.send_text(payload).await
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<JsonRpcNotification>> {
        Some(self.shared.notifications.subscribe())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.replace_reader(None);
    }
}
