// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use super::error::Result;
use crate::resilience::HealthCheck;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Core trait that all storage backends must implement
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // Retrieves a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // Stores a value with a key, replacing any previous value and TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    // Deletes a key
    async fn delete(&self, key: &str) -> Result<bool>;

    // Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // Sets expiration time for a key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    // Adds a member to the set stored at key; true if it was not present
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    // Removes a member from the set stored at key; true if it was present
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    // Members of the set stored at key, empty if the key is missing
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    // Round-trip to the backend
    async fn ping(&self) -> Result<()>;
}

/// Health check that pings a storage backend
#[derive(Debug)]
pub struct StorageHealthCheck<S: StorageBackend>(pub Arc<S>);

#[async_trait]
impl<S: StorageBackend> HealthCheck for StorageHealthCheck<S> {
    async fn check(&self) -> Result<()> {
        self.0.ping().await
    }
}
