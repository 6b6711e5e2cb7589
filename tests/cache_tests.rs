//! Integration tests for the tiered record cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use handle_cache::cache::manager::{CacheManager, SharedCache};
use handle_cache::cache::record::{now_ms, CacheRecord};
use handle_cache::config::{Config, SharedConfig};
use handle_cache::store::disk::LegacyValue;
use handle_cache::store::{MemoryStore, RecordStore};

fn test_config() -> SharedConfig {
    let mut cfg = Config::default();
    cfg.cache.flush_debounce_ms = 50;
    cfg.cache.flush_batch_limit = 100;
    Arc::new(RwLock::new(cfg))
}

fn new_cache(config: SharedConfig) -> (SharedCache, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(CacheManager::new(config, store.clone(), 100));
    (cache, store)
}

#[tokio::test]
async fn test_write_through_and_tiered_read() {
    let config = test_config();
    let (cache, store) = new_cache(config.clone());

    let record = cache.set("@alice", "Alice", 1200).await;
    assert_eq!(record.key, "@alice");

    // Served from memory before any flush happens.
    let hit = cache.get("@alice").await.unwrap().unwrap();
    assert_eq!(hit.record.display_name, "Alice");
    assert!(!hit.stale);

    // Not yet durable; the write sits in the buffer.
    assert!(cache.buffered_writes() > 0);
    cache.flush().await;
    assert_eq!(cache.buffered_writes(), 0);

    // A fresh manager over the same store sees the record (store tier).
    let cache2 = Arc::new(CacheManager::new(config, store, 100));
    let hit = cache2.get("@alice").await.unwrap().unwrap();
    assert_eq!(hit.record.metric, 1200);
}

#[tokio::test]
async fn test_debounced_flush_fires() {
    let config = test_config();
    let (cache, store) = new_cache(config);

    cache.set("@a", "A", 0).await;
    assert_eq!(store.count().await.unwrap(), 0);

    // Debounce is 50ms; give the spawned flush room to run.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(cache.buffered_writes(), 0);
}

#[tokio::test]
async fn test_batch_limit_forces_immediate_flush() {
    let config = test_config();
    {
        let mut cfg = config.write().await;
        cfg.cache.flush_batch_limit = 2;
        cfg.cache.flush_debounce_ms = 60_000;
    }
    let (cache, store) = new_cache(config);

    cache.set("@a", "A", 0).await;
    assert_eq!(store.count().await.unwrap(), 0);
    cache.set("@b", "B", 0).await;

    // Second write hit the batch ceiling; no debounce wait.
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_expire_marks_record_stale() {
    let config = test_config();
    let (cache, _store) = new_cache(config);

    cache.set("@alice", "Alice", 500).await;
    assert!(!cache.get("@alice").await.unwrap().unwrap().stale);

    let count = cache.expire(&["@alice".to_string()]).await.unwrap();
    assert_eq!(count, 1);

    let hit = cache.get("@alice").await.unwrap().unwrap();
    assert!(hit.stale);
    // The record itself survives; only its freshness changes.
    assert_eq!(hit.record.display_name, "Alice");
}

#[tokio::test]
async fn test_invalidate_leaves_durable_copy() {
    let config = test_config();
    let (cache, store) = new_cache(config);

    cache.set("@alice", "Alice", 0).await;
    cache.flush().await;

    cache.invalidate(&["@alice".to_string()]);
    assert_eq!(cache.buffered_writes(), 0);

    // The store copy is untouched and comes back on the next read.
    assert!(store.get("@alice").await.unwrap().is_some());
    assert!(cache.get("@alice").await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_removes_all_tiers() {
    let config = test_config();
    let (cache, store) = new_cache(config);

    cache.set("@alice", "Alice", 0).await;
    cache.flush().await;

    cache.delete(&["@alice".to_string()]).await.unwrap();
    assert!(cache.get("@alice").await.unwrap().is_none());
    assert!(store.get("@alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_empties_everything() {
    let config = test_config();
    let (cache, store) = new_cache(config);

    cache.set("@a", "A", 0).await;
    cache.set("@b", "B", 0).await;
    cache.flush().await;

    cache.clear().await.unwrap();
    assert_eq!(cache.count().await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_count_includes_buffered_writes() {
    let config = test_config();
    let (cache, _store) = new_cache(config);

    cache.set("@durable", "D", 0).await;
    cache.flush().await;
    cache.set("@pending", "P", 0).await;
    // Same key buffered and durable counts once.
    cache.set("@durable", "D2", 0).await;

    assert_eq!(cache.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_prune_removes_aged_records() {
    let config = test_config();
    let delete_age_ms = config.read().await.delete_age_ms();
    let (cache, store) = new_cache(config);

    let ancient = CacheRecord {
        key: "@old".to_string(),
        display_name: "Old".to_string(),
        metric: 0,
        updated_at: now_ms().saturating_sub(delete_age_ms + 60_000),
    };
    store
        .set_many(vec![ancient, CacheRecord::new("@new", "New", 0)])
        .await
        .unwrap();

    let pruned = cache.prune_expired().await.unwrap();
    assert_eq!(pruned, 1);
    assert!(store.get("@old").await.unwrap().is_none());
    assert!(store.get("@new").await.unwrap().is_some());
}

#[tokio::test]
async fn test_legacy_migration_normalizes_entries() {
    let config = test_config();
    let (cache, store) = new_cache(config);

    let mut legacy = std::collections::HashMap::new();
    legacy.insert("@bare".to_string(), LegacyValue::Name("Bare".to_string()));
    legacy.insert(
        "@full".to_string(),
        LegacyValue::Entry {
            name: "Full".to_string(),
            subs: 9000,
            ts: 1234,
        },
    );
    legacy.insert("@empty".to_string(), LegacyValue::Name(String::new()));

    let migrated = cache.migrate_legacy(legacy).await.unwrap();
    assert_eq!(migrated, 2);

    // Bare names arrive with a zero timestamp, so they are already stale and
    // will refresh on next sighting.
    let bare = cache.get("@bare").await.unwrap().unwrap();
    assert_eq!(bare.record.metric, 0);
    assert!(bare.stale);

    let full = store.get("@full").await.unwrap().unwrap();
    assert_eq!(full.metric, 9000);
    assert_eq!(full.updated_at, 1234);

    assert!(cache.get("@empty").await.unwrap().is_none());
}
