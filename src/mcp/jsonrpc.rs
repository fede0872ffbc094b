//! JSON-RPC 2.0 envelopes and response validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{NetraError, Result};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

/// Monotonic numeric ids, starting at 1
#[derive(Debug)]
pub struct IdGenerator(AtomicI64);

impl Default for IdGenerator {
    fn default() -> Self {
        Self(AtomicI64::new(1))
    }
}

impl IdGenerator {
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<JsonRpcError> for NetraError {
    fn from(err: JsonRpcError) -> Self {
        NetraError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Outcome carried by a response: exactly one of result or error
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Result(Value),
    Error(JsonRpcError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    /// `None` only for errors the server could not tie to a request
    pub id: Option<RequestId>,
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcError) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Validate a decoded message as a JSON-RPC 2.0 response.
    ///
    /// `"result": null` is a valid result, so presence is checked on the
    /// raw object rather than through `Option` fields.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(NetraError::Protocol(
                "response is not a JSON object".to_string(),
            ));
        };

        match object.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            other => {
                return Err(NetraError::Protocol(format!(
                    "expected jsonrpc \"2.0\", got {}",
                    other.map(Value::to_string).unwrap_or_else(|| "nothing".to_string())
                )))
            }
        }

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|_| {
                NetraError::Protocol("response id must be a number or string".to_string())
            })?),
        };

        let payload = match (object.remove("result"), object.remove("error")) {
            (Some(result), None) => ResponsePayload::Result(result),
            (None, Some(error)) => {
                let error: JsonRpcError = serde_json::from_value(error).map_err(|e| {
                    NetraError::Protocol(format!("malformed error object: {}", e))
                })?;
                ResponsePayload::Error(error)
            }
            (Some(_), Some(_)) => {
                return Err(NetraError::Protocol(
                    "response carries both result and error".to_string(),
                ))
            }
            (None, None) => {
                return Err(NetraError::Protocol(
                    "response carries neither result nor error".to_string(),
                ))
            }
        };

        if id.is_none() && matches!(payload, ResponsePayload::Result(_)) {
            return Err(NetraError::Protocol(
                "successful response without an id".to_string(),
            ));
        }

        Ok(Self { id, payload })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| NetraError::Protocol(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Unwrap the payload for the request `expected`
    pub fn into_result(self, expected: &RequestId) -> Result<Value> {
        match (&self.id, self.payload) {
            (Some(id), _) if id != expected => Err(NetraError::Protocol(format!(
                "response id {} does not match request id {}",
                id, expected
            ))),
            (_, ResponsePayload::Result(result)) => Ok(result),
            (_, ResponsePayload::Error(error)) => Err(error.into()),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        object.insert(
            "id".to_string(),
            match &self.id {
                Some(RequestId::Number(n)) => Value::from(*n),
                Some(RequestId::String(s)) => Value::from(s.clone()),
                None => Value::Null,
            },
        );
        match &self.payload {
            ResponsePayload::Result(result) => {
                object.insert("result".to_string(), result.clone());
            }
            ResponsePayload::Error(error) => {
                object.insert(
                    "error".to_string(),
                    serde_json::to_value(error).unwrap_or(Value::Null),
                );
            }
        }
        Value::Object(object)
    }
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Classify by shape: `method` + `id` is a request, `method` alone a
    /// notification, anything else must be a response.
    pub fn from_value(value: Value) -> Result<Self> {
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some_and(|id| !id.is_null());
        match (has_method, has_id) {
            (true, true) => serde_json::from_value(value)
                .map(IncomingMessage::Request)
                .map_err(|e| NetraError::Protocol(format!("malformed request: {}", e))),
            (true, false) => serde_json::from_value(value)
                .map(IncomingMessage::Notification)
                .map_err(|e| NetraError::Protocol(format!("malformed notification: {}", e))),
            (false, _) => JsonRpcResponse::from_value(value).map(IncomingMessage::Response),
        }
    }

    /// A single message or a batch
    pub fn parse_all(raw: &str) -> Result<Vec<Self>> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| NetraError::Protocol(format!("invalid JSON: {}", e)))?;
        match value {
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            single => Ok(vec![Self::from_value(single)?]),
        }
    }
}
