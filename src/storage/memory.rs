// src/storage/memory.rs

// In-memory storage, used on its own in tests and as the fallback when
// Redis is unreachable.
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task;
use tokio::time;
use tracing::debug;

use crate::config::InMemoryConfig;
use crate::error::{NetraError, Result, StorageError};
use crate::storage::StorageBackend;

#[derive(Debug, Clone)]
enum MemoryValue {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: MemoryValue,
    expiry: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= now)
    }
}

type Entries = Arc<RwLock<HashMap<String, MemoryEntry>>>;

/// Aborts the cleanup task once the last storage clone is dropped
#[derive(Debug)]
struct CleanupTask(task::JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Entries,
    config: InMemoryConfig,
    _cleanup_task: Option<Arc<CleanupTask>>,
}

fn poisoned() -> NetraError {
    NetraError::Internal("memory storage lock poisoned".to_string())
}

fn wrong_type(key: &str) -> NetraError {
    NetraError::Storage(StorageError::Serialization(format!(
        "key '{}' holds a value of the wrong type",
        key
    )))
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration.
    ///
    /// The background cleanup task needs a running tokio runtime.
    pub fn new(config: InMemoryConfig) -> Self {
        let data: Entries = Arc::new(RwLock::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        let cleanup_task = if config.use_background_task {
            let data_clone = Arc::clone(&data);
            let interval = config.cleanup_interval;

            let handle = task::spawn(async move {
                let mut interval = time::interval(interval);
                loop {
                    interval.tick().await;
                    let removed = Self::cleanup_expired_entries(&data_clone);
                    if removed > 0 {
                        debug!(removed, "Expired in-memory entries cleaned up");
                    }
                }
            });

            Some(Arc::new(CleanupTask(handle)))
        } else {
            None
        };

        Self {
            data,
            config,
            _cleanup_task: cleanup_task,
        }
    }

    /// Clean up expired entries, returning how many were removed
    fn cleanup_expired_entries(data: &Entries) -> usize {
        let now = Instant::now();
        let Ok(mut data) = data.write() else {
            return 0;
        };
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        before - data.len()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryEntry>>> {
        self.data.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryEntry>>> {
        self.data.write().map_err(|_| poisoned())
    }

    /// Live entry count, expired entries included until they are swept
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Drop `key` if it is expired so writes start from a clean slate
    fn purge_if_expired(data: &mut HashMap<String, MemoryEntry>, key: &str) {
        if data
            .get(key)
            .is_some_and(|entry| entry.is_expired(Instant::now()))
        {
            data.remove(key);
        }
    }

    fn ensure_capacity(
        &self,
        data: &HashMap<String, MemoryEntry>,
        key: &str,
    ) -> Result<()> {
        if data.len() >= self.config.max_entries && !data.contains_key(key) {
            return Err(NetraError::Storage(StorageError::CapacityExceeded(format!(
                "in-memory storage is limited to {} entries",
                self.config.max_entries
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.read()?;
        match data.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                MemoryValue::Bytes(bytes) => Ok(Some(bytes.clone())),
                MemoryValue::Set(_) => Err(wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut data = self.write()?;
        Self::purge_if_expired(&mut data, key);
        self.ensure_capacity(&data, key)?;

        let expiry = ttl.map(|duration| Instant::now() + duration);
        data.insert(
            key.to_string(),
            MemoryEntry {
                value: MemoryValue::Bytes(value.to_vec()),
                expiry,
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.write()?;
        match data.remove(key) {
            Some(entry) => Ok(!entry.is_expired(Instant::now())),
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let data = self.read()?;
        Ok(data
            .get(key)
            .is_some_and(|entry| !entry.is_expired(Instant::now())))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut data = self.write()?;
        Self::purge_if_expired(&mut data, key);

        if let Some(entry) = data.get_mut(key) {
            entry.expiry = Some(Instant::now() + ttl);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut data = self.write()?;
        Self::purge_if_expired(&mut data, key);

        if !data.contains_key(key) {
            self.ensure_capacity(&data, key)?;
            data.insert(
                key.to_string(),
                MemoryEntry {
                    value: MemoryValue::Set(BTreeSet::new()),
                    expiry: None,
                },
            );
        }

        match data.get_mut(key).map(|entry| &mut entry.value) {
            Some(MemoryValue::Set(members)) => Ok(members.insert(member.to_string())),
            _ => Err(wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut data = self.write()?;
        Self::purge_if_expired(&mut data, key);

        let (removed, now_empty) = match data.get_mut(key).map(|entry| &mut entry.value) {
            Some(MemoryValue::Set(members)) => (members.remove(member), members.is_empty()),
            Some(MemoryValue::Bytes(_)) => return Err(wrong_type(key)),
            None => (false, false),
        };
        // Redis deletes a set once its last member is gone
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let data = self.read()?;
        match data.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                MemoryValue::Set(members) => Ok(members.iter().cloned().collect()),
                MemoryValue::Bytes(_) => Err(wrong_type(key)),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }
}
