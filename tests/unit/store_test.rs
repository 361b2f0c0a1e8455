//! Tests shared by every store backend

use prometheus_background::core::KeyValueStore;
use prometheus_background::infra::{FileStore, InMemoryStore};
use std::time::Duration;

async fn exercise(store: &dyn KeyValueStore) {
    assert_eq!(store.get("missing").await.unwrap(), None);
    store.delete("missing").await.unwrap();

    store.set("pool/b", "2".into(), None).await.unwrap();
    store.set("pool/a", "1".into(), None).await.unwrap();
    store.set("pool.lock", "x".into(), None).await.unwrap();
    assert_eq!(
        store.keys_with_prefix("pool/").await.unwrap(),
        vec!["pool/a".to_string(), "pool/b".to_string()]
    );

    assert!(!store
        .compare_and_swap("pool/a", Some("0"), Some("9".into()), None)
        .await
        .unwrap());
    assert!(store
        .compare_and_swap("pool/a", Some("1"), Some("9".into()), None)
        .await
        .unwrap());
    assert_eq!(store.get("pool/a").await.unwrap().as_deref(), Some("9"));

    store
        .set("short", "v".into(), Some(Duration::from_millis(30)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.get("short").await.unwrap(), None);
    assert!(store
        .compare_and_swap("short", None, Some("again".into()), None)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_in_memory_store_contract() {
    exercise(&InMemoryStore::new()).await;
}

#[tokio::test]
async fn test_file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise(&FileStore::open(dir.path()).unwrap()).await;
}
