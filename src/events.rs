//! Typed messages pushed to clients over the agent WebSocket.
//!
//! Every message is a JSON object whose `type` field names the event, e.g.
//! `{"type": "agent_started", "agent_name": "triage", "run_id": "...", ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NetraError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentStarted {
        agent_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    AgentThinking {
        agent_name: String,
        thought: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<u32>,
    },
    ToolExecuting {
        agent_name: String,
        tool_name: String,
        #[serde(default)]
        parameters: Value,
    },
    ToolCompleted {
        agent_name: String,
        tool_name: String,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    AgentCompleted {
        agent_name: String,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    AgentError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_name: Option<String>,
        error: String,
        #[serde(default)]
        recoverable: bool,
    },
    PartialResult {
        agent_name: String,
        content: String,
        #[serde(default)]
        is_complete: bool,
    },
    ConnectionEstablished {
        connection_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    Ping,
    Pong,
}

impl AgentEvent {
    /// The wire value of the `type` field
    pub fn event_type(&self) -> &'static str {
        match self {
            AgentEvent::AgentStarted { .. } => "agent_started",
            AgentEvent::AgentThinking { .. } => "agent_thinking",
            AgentEvent::ToolExecuting { .. } => "tool_executing",
            AgentEvent::ToolCompleted { .. } => "tool_completed",
            AgentEvent::AgentCompleted { .. } => "agent_completed",
            AgentEvent::AgentError { .. } => "agent_error",
            AgentEvent::PartialResult { .. } => "partial_result",
            AgentEvent::ConnectionEstablished { .. } => "connection_established",
            AgentEvent::Ping => "ping",
            AgentEvent::Pong => "pong",
        }
    }

    /// Whether the run is over after this event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::AgentCompleted { .. } | AgentEvent::AgentError { recoverable: false, .. }
        )
    }
}

/// An [`AgentEvent`] plus the run it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketMessage {
    #[serde(flatten)]
    pub event: AgentEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl WebSocketMessage {
    pub fn new(event: AgentEvent) -> Self {
        Self {
            event,
            run_id: None,
            thread_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_run(event: AgentEvent, run_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            thread_id: Some(thread_id.into()),
            ..Self::new(event)
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(NetraError::from)
    }

    /// Parse an inbound frame; unknown `type` values are protocol errors
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| NetraError::Protocol(format!("invalid WebSocket message: {}", e)))
    }
}
