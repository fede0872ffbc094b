// src/storage/tests/mod.rs


// Behaviour every backend must share
pub(crate) mod common {
    use std::time::Duration;
    use tokio::time;

    use crate::error::Result;
    use crate::storage::StorageBackend;

    pub async fn test_basic_operations<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}:basic", prefix);
        let value: &[u8] = b"test_value";

        storage.set(&key, value, None).await?;
        assert_eq!(storage.get(&key).await?.as_deref(), Some(value));
        assert!(storage.exists(&key).await?);

        // Overwrite
        storage.set(&key, b"second", None).await?;
        assert_eq!(storage.get(&key).await?.as_deref(), Some(&b"second"[..]));

        assert!(!storage.exists(&format!("{}:missing", prefix)).await?);
        assert!(storage.get(&format!("{}:missing", prefix)).await?.is_none());

        assert!(storage.delete(&key).await?);
        assert!(!storage.exists(&key).await?);
        assert!(!storage.delete(&key).await?);
        Ok(())
    }

    pub async fn test_set_operations<S: StorageBackend>(storage: &S, prefix: &str) -> Result<()> {
        let key = format!("{}:set", prefix);

        assert!(storage.set_members(&key).await?.is_empty());
        assert!(storage.set_add(&key, "b").await?);
        assert!(storage.set_add(&key, "a").await?);
        assert!(!storage.set_add(&key, "a").await?);
        assert_eq!(storage.set_members(&key).await?, vec!["a", "b"]);

        assert!(storage.set_remove(&key, "a").await?);
        assert!(!storage.set_remove(&key, "a").await?);
        assert!(storage.set_remove(&key, "b").await?);

        // An emptied set no longer exists
        assert!(!storage.exists(&key).await?);
        Ok(())
    }

    pub async fn test_key_expiration<S: StorageBackend>(storage: &S, prefix: &str, ttl: Duration) -> Result<()> {
        let key = format!("{}:expiring", prefix);
        storage.set(&key, b"expiring_value", Some(ttl)).await?;
        assert!(storage.exists(&key).await?);

        time::sleep(ttl + ttl / 2).await;
        assert!(!storage.exists(&key).await?);
        assert!(storage.get(&key).await?.is_none());

        let key2 = format!("{}:expire_method", prefix);
        storage.set(&key2, b"value", None).await?;
        assert!(storage.expire(&key2, ttl).await?);
        assert!(storage.exists(&key2).await?);

        time::sleep(ttl + ttl / 2).await;
        assert!(!storage.exists(&key2).await?);
        assert!(!storage.expire(&key2, ttl).await?);
        Ok(())
    }
}
