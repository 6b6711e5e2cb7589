//! Durable key→record storage.
//!
//! The cache manager talks to storage only through the [`RecordStore`] trait:
//! - [`disk`]: sharded JSON files under a data directory (production)
//! - [`MemoryStore`]: process-local map (tests, ephemeral deployments)

pub mod disk;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::record::CacheRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Bulk-oriented durable storage for cache records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the records present for the given keys. Missing keys are simply
    /// absent from the result.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<CacheRecord>, StoreError>;

    /// Write a batch of records, overwriting existing entries.
    async fn set_many(&self, records: Vec<CacheRecord>) -> Result<(), StoreError>;

    /// Delete the given keys. Missing keys are ignored.
    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError>;

    /// All stored records.
    async fn entries(&self) -> Result<Vec<CacheRecord>, StoreError>;

    /// All stored keys. Cheaper than [`RecordStore::entries`] when only the
    /// key set matters (e.g. counting).
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Remove everything.
    async fn clear(&self) -> Result<(), StoreError>;

    /// Fetch a single record.
    async fn get(&self, key: &str) -> Result<Option<CacheRecord>, StoreError> {
        let keys = [key.to_string()];
        let mut found = self.get_many(&keys).await?;
        Ok(found.pop())
    }

    /// Number of stored records.
    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.keys().await?.len())
    }
}

/// In-memory [`RecordStore`] with no durability.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, CacheRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<CacheRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(keys.iter().filter_map(|k| records.get(k).cloned()).collect())
    }

    async fn set_many(&self, batch: Vec<CacheRecord>) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        for record in batch {
            records.insert(record.key.clone(), record);
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        for key in keys {
            records.remove(key);
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CacheRecord>, StoreError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().unwrap().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.lock().unwrap().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.records.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store
            .set_many(vec![
                CacheRecord::new("@a", "Alice", 10),
                CacheRecord::new("@b", "Bob", 0),
            ])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let got = store.get("@a").await.unwrap().unwrap();
        assert_eq!(got.display_name, "Alice");

        store.delete_many(&["@a".to_string()]).await.unwrap();
        assert!(store.get("@a").await.unwrap().is_none());

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
