// src/session/mod.rs
//! Session records kept in Redis (or the in-memory fallback).
//!
//! Key layout:
//! - `session:{session_id}` holds the session as JSON with a TTL
//! - `user_sessions:{user_id}` is a set of that user's session ids
//! - `demo:session:{session_id}` holds demo sessions, which are not indexed per user

mod manager;

#[cfg(test)]
mod tests;

pub use manager::RedisSessionManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

pub fn user_sessions_key(user_id: &str) -> String {
    format!("user_sessions:{}", user_id)
}

pub fn demo_session_key(session_id: &str) -> String {
    format!("demo:session:{}", session_id)
}

/// A stored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Where a session was opened from
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
