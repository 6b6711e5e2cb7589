//! Cache manager: orchestrates the memory tier, write buffer, and store.
//!
//! Read path: LRU memory tier → uncommitted write buffer → durable store
//! (store hits are copied into the memory tier on the way out). Write path:
//! write-through to memory plus a buffer that flushes to the store as one
//! batch, either after a debounce quiet period or when the batch ceiling is
//! reached. Also owns durable-store pruning and legacy-format migration.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::lru::LruCache;
use crate::cache::record::{now_ms, CacheRecord};
use crate::config::SharedConfig;
use crate::store::disk::LegacyValue;
use crate::store::{RecordStore, StoreError};

/// A cache hit plus its derived freshness.
#[derive(Debug, Clone)]
pub struct CachedLookup {
    pub record: CacheRecord,
    /// True when the record's age exceeds the configured TTL. Stale records
    /// are still returned; the caller decides whether to refresh.
    pub stale: bool,
}

/// The cache manager. Shared as `Arc<CacheManager>`; all interior state is
/// lock-protected.
pub struct CacheManager {
    config: SharedConfig,
    store: Arc<dyn RecordStore>,
    memory: Mutex<LruCache>,
    buffer: Mutex<HashMap<String, CacheRecord>>,
    flush_generation: AtomicU64,
}

/// Thread-safe handle to the cache manager.
pub type SharedCache = Arc<CacheManager>;

impl CacheManager {
    pub fn new(config: SharedConfig, store: Arc<dyn RecordStore>, memory_capacity: usize) -> Self {
        Self {
            config,
            store,
            memory: Mutex::new(LruCache::new(memory_capacity)),
            buffer: Mutex::new(HashMap::new()),
            flush_generation: AtomicU64::new(0),
        }
    }

    /// Look up a record across all tiers.
    pub async fn get(&self, key: &str) -> Result<Option<CachedLookup>, StoreError> {
        let ttl_ms = self.config.read().await.ttl_ms();

        if let Some(record) = self.memory.lock().unwrap().get(key) {
            let stale = record.is_stale(ttl_ms);
            return Ok(Some(CachedLookup { record, stale }));
        }

        if let Some(record) = self.buffer.lock().unwrap().get(key).cloned() {
            let stale = record.is_stale(ttl_ms);
            return Ok(Some(CachedLookup { record, stale }));
        }

        if let Some(record) = self.store.get(key).await? {
            self.memory.lock().unwrap().insert(record.clone());
            let stale = record.is_stale(ttl_ms);
            return Ok(Some(CachedLookup { record, stale }));
        }

        Ok(None)
    }

    /// Write-through set: stamps `updated_at = now`, updates the memory tier
    /// synchronously, and buffers the durable write.
    pub async fn set(
        self: &Arc<Self>,
        key: impl Into<String>,
        display_name: impl Into<String>,
        metric: u64,
    ) -> CacheRecord {
        let record = CacheRecord::new(key, display_name, metric);
        self.put(record.clone()).await;
        record
    }

    /// Insert a pre-built record (used by set, import, and migration warm-up).
    pub async fn put(self: &Arc<Self>, record: CacheRecord) {
        let cache_cfg = self.config.read().await.cache.clone();

        self.memory.lock().unwrap().insert(record.clone());
        let pending = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.insert(record.key.clone(), record);
            buffer.len()
        };

        if pending >= cache_cfg.flush_batch_limit {
            self.flush().await;
        } else {
            self.schedule_flush(Duration::from_millis(cache_cfg.flush_debounce_ms));
        }
    }

    /// Debounced flush: fires only if no newer write arrives within `delay`.
    fn schedule_flush(self: &Arc<Self>, delay: Duration) {
        let generation = self.flush_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if cache.flush_generation.load(Ordering::SeqCst) == generation {
                cache.flush().await;
            }
        });
    }

    /// Flush the write buffer to the durable store as one batch. On failure
    /// the batch is re-buffered (newer writes win) and retried on the next
    /// flush trigger.
    pub async fn flush(&self) {
        let batch: Vec<CacheRecord> = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.drain().map(|(_, record)| record).collect()
        };
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        match self.store.set_many(batch.clone()).await {
            Ok(()) => debug!(count, "Flushed write buffer"),
            Err(err) => {
                warn!(count, error = %err, "Write buffer flush failed, re-buffering");
                let mut buffer = self.buffer.lock().unwrap();
                for record in batch {
                    buffer.entry(record.key.clone()).or_insert(record);
                }
            }
        }
    }

    /// Drop entries from the memory tier and write buffer only. Used when
    /// another party already holds the authoritative newer value; durable
    /// storage is untouched.
    pub fn invalidate(&self, keys: &[String]) {
        let mut memory = self.memory.lock().unwrap();
        let mut buffer = self.buffer.lock().unwrap();
        for key in keys {
            memory.remove(key);
            buffer.remove(key);
        }
    }

    /// Delete entries from every tier.
    pub async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        self.invalidate(keys);
        self.store.delete_many(keys).await
    }

    /// Force-stale the given keys so their next sighting triggers a refresh.
    /// Writes straight through to the store; this is a rare admin operation.
    pub async fn expire(&self, keys: &[String]) -> Result<usize, StoreError> {
        let ttl_ms = self.config.read().await.ttl_ms();
        let expired_ts = now_ms().saturating_sub(ttl_ms + 10_000);

        let mut stamped = Vec::new();
        for key in keys {
            if let Some(lookup) = self.get(key).await? {
                let mut record = lookup.record;
                record.updated_at = expired_ts;
                stamped.push(record);
            }
        }

        let count = stamped.len();
        if count > 0 {
            {
                let mut memory = self.memory.lock().unwrap();
                let mut buffer = self.buffer.lock().unwrap();
                for record in &stamped {
                    memory.insert(record.clone());
                    buffer.remove(&record.key);
                }
            }
            self.store.set_many(stamped).await?;
        }
        Ok(count)
    }

    /// Empty every tier, including durable storage.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.memory.lock().unwrap().clear();
        self.buffer.lock().unwrap().clear();
        self.store.clear().await
    }

    /// Delete durable records older than the configured deletion age. Runs at
    /// startup and again when the deletion-age setting changes.
    pub async fn prune_expired(&self) -> Result<usize, StoreError> {
        let cutoff = now_ms().saturating_sub(self.config.read().await.delete_age_ms());

        let doomed: Vec<String> = self
            .store
            .entries()
            .await?
            .into_iter()
            .filter(|record| record.updated_at < cutoff)
            .map(|record| record.key)
            .collect();

        if !doomed.is_empty() {
            self.store.delete_many(&doomed).await?;
            let mut memory = self.memory.lock().unwrap();
            for key in &doomed {
                memory.remove(key);
            }
            info!(count = doomed.len(), "Pruned aged records");
        }
        Ok(doomed.len())
    }

    /// Number of distinct keys across the durable store and write buffer.
    pub async fn count(&self) -> Result<usize, StoreError> {
        let mut keys: HashSet<String> = self.store.keys().await?.into_iter().collect();
        for key in self.buffer.lock().unwrap().keys() {
            keys.insert(key.clone());
        }
        Ok(keys.len())
    }

    /// Migrate a legacy flat-format map into the current store. Entries are
    /// normalized (bare strings become records with metric 0 and
    /// `updated_at` 0, so they refresh on next sighting) and written through
    /// before the caller deletes the legacy data. Safe to interrupt: nothing
    /// is deleted here, so a partial failure leaves the legacy data intact
    /// for retry on next startup.
    pub async fn migrate_legacy(
        self: &Arc<Self>,
        legacy: HashMap<String, LegacyValue>,
    ) -> Result<usize, StoreError> {
        let mut migrated = Vec::new();
        for (key, value) in legacy {
            let record = match value {
                LegacyValue::Name(name) => CacheRecord {
                    key,
                    display_name: name,
                    metric: 0,
                    updated_at: 0,
                },
                LegacyValue::Entry { name, subs, ts } => CacheRecord {
                    key,
                    display_name: name,
                    metric: subs,
                    updated_at: ts,
                },
            };
            if record.display_name.is_empty() {
                continue;
            }
            migrated.push(record);
        }

        let count = migrated.len();
        if count > 0 {
            self.store.set_many(migrated.clone()).await?;
            let mut memory = self.memory.lock().unwrap();
            for record in migrated {
                memory.insert(record);
            }
            info!(count, "Migrated legacy store");
        }
        Ok(count)
    }

    /// Snapshot of the full key→record map (durable plus buffered), used by
    /// backup export.
    pub async fn snapshot(&self) -> Result<HashMap<String, CacheRecord>, StoreError> {
        let mut map: HashMap<String, CacheRecord> = self
            .store
            .entries()
            .await?
            .into_iter()
            .map(|record| (record.key.clone(), record))
            .collect();
        for (key, record) in self.buffer.lock().unwrap().iter() {
            map.insert(key.clone(), record.clone());
        }
        Ok(map)
    }

    /// Pending (unflushed) write count, surfaced in health stats.
    pub fn buffered_writes(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Currently configured TTL in milliseconds.
    pub async fn ttl_ms(&self) -> u64 {
        self.config.read().await.ttl_ms()
    }
}
