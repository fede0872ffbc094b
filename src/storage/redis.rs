// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::fmt;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{NetraError, Result, StorageError};
use crate::storage::StorageBackend;

/// Redis counts TTLs in whole seconds; round up so short TTLs never become 0
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

pub struct RedisStorage {
    client: Client,
    connection: ConnectionManager,
    config: RedisConfig,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("connection_timeout", &self.config.connection_timeout)
            .finish()
    }
}

// Manually implement Clone
impl Clone for RedisStorage {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            connection: self.connection.clone(),
            config: self.config.clone(),
        }
    }
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| NetraError::Storage(StorageError::RedisConnection(e.to_string())))?;

        let connection_future = ConnectionManager::new(client.clone());

        let connection_manager =
            match tokio::time::timeout(config.connection_timeout, connection_future).await {
                Ok(result) => result.map_err(|e| {
                    NetraError::Storage(StorageError::RedisConnection(e.to_string()))
                })?,
                Err(_) => {
                    return Err(NetraError::Storage(StorageError::RedisConnection(
                        format!(
                            "Connection to Redis at {} timed out after {:?}",
                            config.url, config.connection_timeout
                        ),
                    )));
                }
            };

        Ok(Self {
            client,
            connection: connection_manager,
            config,
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Run a command under the connection timeout
    async fn run<T, F, Fut>(&self, operation: &str, command: F) -> Result<T>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        // ConnectionManager is a cheap handle over a multiplexed connection
        let conn = self.connection.clone();
        match tokio::time::timeout(self.config.connection_timeout, command(conn)).await {
            Ok(result) => result.map_err(NetraError::from),
            Err(_) => Err(NetraError::Timeout(format!(
                "Redis {} timed out after {:?}",
                operation, self.config.connection_timeout
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run("GET", |mut conn| async move {
            let value: Option<Vec<u8>> = conn.get(key).await?;
            Ok::<_, redis::RedisError>(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        match ttl {
            Some(ttl) => {
                let secs = ttl_secs(ttl);
                self.run("SETEX", |mut conn| async move {
                    conn.set_ex::<_, _, ()>(key, value, secs).await
                })
                .await
            }
            None => {
                self.run("SET", |mut conn| async move {
                    conn.set::<_, _, ()>(key, value).await
                })
                .await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self
            .run("DEL", |mut conn| async move {
                let removed: i64 = conn.del(key).await?;
                Ok::<_, redis::RedisError>(removed)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.run("EXISTS", |mut conn| async move {
            let exists: bool = conn.exists(key).await?;
            Ok::<_, redis::RedisError>(exists)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let secs = ttl_secs(ttl) as i64;
        self.run("EXPIRE", |mut conn| async move {
            let updated: bool = conn.expire(key, secs).await?;
            Ok::<_, redis::RedisError>(updated)
        })
        .await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let added: i64 = self
            .run("SADD", |mut conn| async move {
                let added: i64 = conn.sadd(key, member).await?;
                Ok::<_, redis::RedisError>(added)
            })
            .await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let removed: i64 = self
            .run("SREM", |mut conn| async move {
                let removed: i64 = conn.srem(key, member).await?;
                Ok::<_, redis::RedisError>(removed)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut members: Vec<String> = self
            .run("SMEMBERS", |mut conn| async move {
                let members: Vec<String> = conn.smembers(key).await?;
                Ok::<_, redis::RedisError>(members)
            })
            .await?;
        members.sort();
        Ok(members)
    }

    /// Ping Redis to check health with timeout
    async fn ping(&self) -> Result<()> {
        let reply: String = self
            .run("PING", |mut conn| async move {
                let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok::<_, redis::RedisError>(reply)
            })
            .await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(NetraError::Storage(StorageError::RedisCommand(format!(
                "Unexpected response from Redis PING: {}",
                reply
            ))))
        }
    }
}
