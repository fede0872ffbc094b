// src/session/tests/mod.rs

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::config::{InMemoryConfig, SessionConfig};
use crate::error::NetraError;
use crate::resilience::{ResilienceConfig, ResilientStorage, StorageMode};
use crate::session::{
    demo_session_key, session_key, user_sessions_key, ClientInfo, RedisSessionManager,
};
use crate::storage::{MemoryStorage, StorageBackend};
use crate::test_utils::memory_storage;

fn config() -> SessionConfig {
    SessionConfig {
        session_ttl: Duration::from_secs(3600),
        demo_session_ttl: Duration::from_secs(600),
        max_sessions_per_user: 3,
    }
}

fn manager() -> RedisSessionManager<MemoryStorage> {
    RedisSessionManager::new(Arc::new(memory_storage()), config())
}

fn data(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_key_layout() {
    assert_eq!(session_key("abc"), "session:abc");
    assert_eq!(user_sessions_key("u1"), "user_sessions:u1");
    assert_eq!(demo_session_key("abc"), "demo:session:abc");
}

#[tokio::test]
async fn test_create_and_get_session() {
    let manager = manager();
    let session = manager
        .create_session("user-1", data(&[("role", json!("admin"))]))
        .await
        .unwrap();

    assert_eq!(session.user_id, "user-1");
    assert!(!session.is_demo);
    assert!(session.expires_at > session.created_at);

    let stored = manager.get_session(&session.session_id).await.unwrap().unwrap();
    assert_eq!(stored, session);
    assert!(manager
        .storage()
        .exists(&session_key(&session.session_id))
        .await
        .unwrap());
    assert_eq!(
        manager.storage().set_members(&user_sessions_key("user-1")).await.unwrap(),
        vec![session.session_id.clone()]
    );
}

#[tokio::test]
async fn test_client_info_is_recorded() {
    let manager = manager();
    let session = manager
        .create_session_with_client(
            "user-1",
            Map::new(),
            ClientInfo {
                ip_address: Some("10.0.0.7".to_string()),
                user_agent: Some("netra-cli/0.1".to_string()),
            },
        )
        .await
        .unwrap();

    let stored = manager.get_session(&session.session_id).await.unwrap().unwrap();
    assert_eq!(stored.ip_address.as_deref(), Some("10.0.0.7"));
    assert_eq!(stored.user_agent.as_deref(), Some("netra-cli/0.1"));
}

#[tokio::test]
async fn test_missing_session_is_none() {
    let manager = manager();
    assert!(manager.get_session("no-such-session").await.unwrap().is_none());
    assert!(manager
        .update_session("no-such-session", Map::new())
        .await
        .unwrap()
        .is_none());
    assert!(!manager.delete_session("no-such-session").await.unwrap());
}

#[tokio::test]
async fn test_empty_ids_are_rejected() {
    let manager = manager();
    assert!(matches!(
        manager.create_session("", Map::new()).await,
        Err(NetraError::Validation(_))
    ));
    assert!(matches!(
        manager.get_session("  ").await,
        Err(NetraError::Validation(_))
    ));
    assert!(matches!(
        manager.get_user_sessions("").await,
        Err(NetraError::Validation(_))
    ));
}

#[tokio::test]
async fn test_update_merges_data() {
    let manager = manager();
    let session = manager
        .create_session("user-1", data(&[("a", json!(1)), ("b", json!(2))]))
        .await
        .unwrap();

    let updated = manager
        .update_session(&session.session_id, data(&[("b", json!(3)), ("c", json!(4))]))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.data["a"], json!(1));
    assert_eq!(updated.data["b"], json!(3));
    assert_eq!(updated.data["c"], json!(4));
    assert!(updated.last_activity >= session.last_activity);

    let stored = manager.get_session(&session.session_id).await.unwrap().unwrap();
    assert_eq!(stored.data, updated.data);
}

#[tokio::test]
async fn test_touch_and_extend_push_expiry() {
    let manager = manager();
    let session = manager.create_session("user-1", Map::new()).await.unwrap();

    time::sleep(Duration::from_millis(20)).await;
    let touched = manager.touch_session(&session.session_id).await.unwrap().unwrap();
    assert!(touched.expires_at > session.expires_at);
    assert!(touched.last_activity > session.last_activity);

    let extended = manager
        .extend_session(&session.session_id, Duration::from_secs(600))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        extended.expires_at - touched.expires_at,
        chrono::Duration::seconds(600)
    );
}

#[tokio::test]
async fn test_sessions_expire() {
    let manager = RedisSessionManager::new(
        Arc::new(memory_storage()),
        SessionConfig {
            session_ttl: Duration::from_millis(50),
            ..config()
        },
    );
    let session = manager.create_session("user-1", Map::new()).await.unwrap();
    assert!(manager.get_session(&session.session_id).await.unwrap().is_some());

    time::sleep(Duration::from_millis(80)).await;
    assert!(manager.get_session(&session.session_id).await.unwrap().is_none());
    assert!(manager.get_user_sessions("user-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_index_outlives_shorter_sibling_sessions() {
    let manager = RedisSessionManager::new(
        Arc::new(memory_storage()),
        SessionConfig {
            session_ttl: Duration::from_millis(60),
            ..config()
        },
    );
    let long_lived = manager.create_session("user-1", Map::new()).await.unwrap();
    manager
        .extend_session(&long_lived.session_id, Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    // A fresh short session must not cut the index TTL back down
    let short_lived = manager.create_session("user-1", Map::new()).await.unwrap();
    time::sleep(Duration::from_millis(120)).await;

    assert!(manager.get_session(&short_lived.session_id).await.unwrap().is_none());
    let sessions = manager.get_user_sessions("user-1").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, long_lived.session_id);

    assert_eq!(manager.invalidate_user_sessions("user-1").await.unwrap(), 1);
    assert!(manager.get_session(&long_lived.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_session_updates_index() {
    let manager = manager();
    let first = manager.create_session("user-1", Map::new()).await.unwrap();
    let second = manager.create_session("user-1", Map::new()).await.unwrap();

    assert!(manager.delete_session(&first.session_id).await.unwrap());
    assert!(manager.get_session(&first.session_id).await.unwrap().is_none());

    let remaining = manager.get_user_sessions("user-1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].session_id, second.session_id);
}

#[tokio::test]
async fn test_oldest_sessions_evicted_over_limit() {
    let manager = manager();
    let mut ids = Vec::new();
    for _ in 0..5 {
        let session = manager.create_session("user-1", Map::new()).await.unwrap();
        ids.push(session.session_id);
        time::sleep(Duration::from_millis(5)).await;
    }

    let sessions = manager.get_user_sessions("user-1").await.unwrap();
    let live: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(live, vec![ids[2].as_str(), ids[3].as_str(), ids[4].as_str()]);
    assert!(manager.get_session(&ids[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalidate_user_sessions() {
    let manager = manager();
    manager.create_session("user-1", Map::new()).await.unwrap();
    manager.create_session("user-1", Map::new()).await.unwrap();
    let other = manager.create_session("user-2", Map::new()).await.unwrap();

    assert_eq!(manager.invalidate_user_sessions("user-1").await.unwrap(), 2);
    assert!(manager.get_user_sessions("user-1").await.unwrap().is_empty());
    assert!(!manager
        .storage()
        .exists(&user_sessions_key("user-1"))
        .await
        .unwrap());
    assert!(manager.get_session(&other.session_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_demo_sessions_are_separate() {
    let manager = manager();
    let demo = manager
        .create_demo_session(data(&[("industry", json!("retail"))]))
        .await
        .unwrap();

    assert!(demo.is_demo);
    assert!(demo.user_id.starts_with("demo-"));
    assert_eq!(
        demo.expires_at - demo.created_at,
        chrono::Duration::seconds(600)
    );

    let stored = manager.get_demo_session(&demo.session_id).await.unwrap().unwrap();
    assert_eq!(stored.data["industry"], json!("retail"));
    assert!(manager
        .storage()
        .exists(&demo_session_key(&demo.session_id))
        .await
        .unwrap());

    // Not visible as a regular session
    assert!(manager.get_session(&demo.session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_record_is_dropped() {
    let manager = manager();
    manager
        .storage()
        .set(&session_key("broken"), b"not json", None)
        .await
        .unwrap();

    assert!(manager.get_session("broken").await.unwrap().is_none());
    assert!(!manager.storage().exists(&session_key("broken")).await.unwrap());
}

#[tokio::test]
async fn test_manager_over_memory_only_resilient_storage() {
    let storage: ResilientStorage = ResilientStorage::memory_only(ResilienceConfig {
        memory_config: InMemoryConfig {
            use_background_task: false,
            ..InMemoryConfig::default()
        },
        ..ResilienceConfig::default()
    })
    .await
    .unwrap();
    let manager = RedisSessionManager::new(Arc::new(storage), config());

    assert_eq!(manager.storage_mode().await, StorageMode::MemoryOnly);
    let session = manager.create_session("user-1", Map::new()).await.unwrap();
    assert!(manager.get_session(&session.session_id).await.unwrap().is_some());
}
