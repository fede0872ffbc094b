use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{NetraError, Result};
use crate::resilience::{ResilientStorage, StorageMode};
use crate::session::{
    demo_session_key, session_key, user_sessions_key, ClientInfo, Session,
};
use crate::storage::StorageBackend;

fn chrono_ttl(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| NetraError::Config(format!("session ttl out of range: {}", e)))
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(NetraError::Validation(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Session CRUD over any [`StorageBackend`], normally Redis with memory fallback
#[derive(Debug)]
pub struct RedisSessionManager<S: StorageBackend = ResilientStorage> {
    storage: Arc<S>,
    config: SessionConfig,
}

impl<S: StorageBackend> RedisSessionManager<S> {
    pub fn new(storage: Arc<S>, config: SessionConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Write `session` under `key` with a TTL matching its expiry
    async fn store(&self, key: &str, session: &Session) -> Result<()> {
        let remaining = (session.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            self.storage.delete(key).await?;
            return Ok(());
        }
        let payload = serde_json::to_vec(session)?;
        self.storage.set(key, &payload, Some(remaining)).await
    }

    async fn load(&self, key: &str) -> Result<Option<Session>> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        let session: Session = match serde_json::from_slice(&bytes) {
            Ok(session) => session,
            Err(e) => {
                warn!(key, error = %e, "Dropping unreadable session record");
                self.storage.delete(key).await?;
                return Ok(None);
            }
        };
        if session.is_expired(Utc::now()) {
            self.storage.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub async fn create_session(&self, user_id: &str, data: Map<String, Value>) -> Result<Session> {
        self.create_session_with_client(user_id, data, ClientInfo::default())
            .await
    }

    pub async fn create_session_with_client(
        &self,
        user_id: &str,
        data: Map<String, Value>,
        client: ClientInfo,
    ) -> Result<Session> {
        require(user_id, "user_id")?;

        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + chrono_ttl(self.config.session_ttl)?,
            data,
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            is_demo: false,
        };

        self.store(&session_key(&session.session_id), &session)
            .await?;

        let index_key = user_sessions_key(user_id);
        self.storage
            .set_add(&index_key, &session.session_id)
            .await?;
        self.refresh_index_ttl(user_id).await?;

        crate::session_event!("created", session.session_id, user_id);
        self.enforce_session_limit(user_id).await?;
        Ok(session)
    }

    /// Keep the user's index alive until its longest-lived session expires
    async fn refresh_index_ttl(&self, user_id: &str) -> Result<()> {
        let now = Utc::now();
        let longest = self
            .get_user_sessions(user_id)
            .await?
            .iter()
            .filter_map(|session| (session.expires_at - now).to_std().ok())
            .max();
        if let Some(ttl) = longest.filter(|ttl| !ttl.is_zero()) {
            self.storage.expire(&user_sessions_key(user_id), ttl).await?;
        }
        Ok(())
    }

    /// Evict the oldest sessions beyond `max_sessions_per_user`
    async fn enforce_session_limit(&self, user_id: &str) -> Result<()> {
        let sessions = self.get_user_sessions(user_id).await?;
        let excess = sessions
            .len()
            .saturating_sub(self.config.max_sessions_per_user);
        for session in sessions.iter().take(excess) {
            debug!(
                session_id = %session.session_id,
                user_id,
                "Evicting session over per-user limit"
            );
            self.delete_session(&session.session_id).await?;
        }
        Ok(())
    }

    /// `None` when the session is missing or expired
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        require(session_id, "session_id")?;
        self.load(&session_key(session_id)).await
    }

    /// Merge `data` into the session and refresh its activity time
    pub async fn update_session(
        &self,
        session_id: &str,
        data: Map<String, Value>,
    ) -> Result<Option<Session>> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        session.data.extend(data);
        session.last_activity = Utc::now();
        self.store(&session_key(session_id), &session).await?;
        Ok(Some(session))
    }

    /// Record activity and slide the expiry to a full session TTL
    pub async fn touch_session(&self, session_id: &str) -> Result<Option<Session>> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        session.last_activity = now;
        session.expires_at = now + chrono_ttl(self.config.session_ttl)?;
        self.store(&session_key(session_id), &session).await?;
        self.refresh_index_ttl(&session.user_id).await?;
        Ok(Some(session))
    }

    /// Push the expiry out by `extra`
    pub async fn extend_session(
        &self,
        session_id: &str,
        extra: Duration,
    ) -> Result<Option<Session>> {
        let Some(mut session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        session.expires_at = session.expires_at + chrono_ttl(extra)?;
        self.store(&session_key(session_id), &session).await?;
        self.refresh_index_ttl(&session.user_id).await?;
        Ok(Some(session))
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        require(session_id, "session_id")?;
        let key = session_key(session_id);
        let session = self.load(&key).await?;
        let deleted = self.storage.delete(&key).await?;

        if let Some(session) = session {
            self.storage
                .set_remove(&user_sessions_key(&session.user_id), session_id)
                .await?;
            crate::session_event!("deleted", session_id, session.user_id);
        }
        Ok(deleted)
    }

    /// Live sessions for `user_id`, oldest first; stale index entries are pruned
    pub async fn get_user_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        require(user_id, "user_id")?;
        let index_key = user_sessions_key(user_id);

        let mut sessions = Vec::new();
        for session_id in self.storage.set_members(&index_key).await? {
            match self.load(&session_key(&session_id)).await? {
                Some(session) => sessions.push(session),
                None => {
                    self.storage.set_remove(&index_key, &session_id).await?;
                }
            }
        }
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// Delete every session of `user_id`, returning how many were live
    pub async fn invalidate_user_sessions(&self, user_id: &str) -> Result<usize> {
        require(user_id, "user_id")?;
        let index_key = user_sessions_key(user_id);

        let mut removed = 0;
        for session_id in self.storage.set_members(&index_key).await? {
            if self.storage.delete(&session_key(&session_id)).await? {
                removed += 1;
            }
        }
        self.storage.delete(&index_key).await?;
        info!(user_id, removed, "User sessions invalidated");
        Ok(removed)
    }

    pub async fn create_demo_session(&self, data: Map<String, Value>) -> Result<Session> {
        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let session = Session {
            user_id: format!("demo-{}", &session_id[..8]),
            session_id,
            created_at: now,
            last_activity: now,
            expires_at: now + chrono_ttl(self.config.demo_session_ttl)?,
            data,
            ip_address: None,
            user_agent: None,
            is_demo: true,
        };
        self.store(&demo_session_key(&session.session_id), &session)
            .await?;
        crate::session_event!("demo_created", session.session_id, session.user_id);
        Ok(session)
    }

    pub async fn get_demo_session(&self, session_id: &str) -> Result<Option<Session>> {
        require(session_id, "session_id")?;
        self.load(&demo_session_key(session_id)).await
    }
}

impl<P: StorageBackend + 'static> RedisSessionManager<ResilientStorage<P>> {
    /// Whether sessions currently live in Redis or in the memory fallback
    pub async fn storage_mode(&self) -> StorageMode {
        self.storage.mode().await
    }
}
