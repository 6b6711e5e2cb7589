//! Disk-backed record store.
//!
//! Each record is one JSON file under a two-level directory layout to avoid
//! piling every key into a single directory: the file name is the hex-encoded
//! key and the shard directory is its first two hex digits
//! (`@alice` → `40/40616c696365.json`).
//!
//! The data directory may also hold a legacy flat-map file from the previous
//! storage format; [`DiskStore::load_legacy`] and [`DiskStore::remove_legacy`]
//! expose it to the cache manager's migration pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::record::CacheRecord;
use crate::store::{RecordStore, StoreError};

/// File name of the legacy flat-map store awaiting migration.
pub const LEGACY_STORE_FILE: &str = "legacy_store.json";

/// A value from the legacy flat store: either a bare display name or an
/// object that predates the current record shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyValue {
    Name(String),
    Entry {
        name: String,
        #[serde(default)]
        subs: u64,
        #[serde(default)]
        ts: u64,
    },
}

/// Sharded on-disk [`RecordStore`].
pub struct DiskStore {
    data_dir: PathBuf,
}

impl DiskStore {
    /// Open (and create if needed) a store rooted at `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        let encoded = hex_encode(key);
        let shard = &encoded[..2.min(encoded.len())];
        self.data_dir.join(shard).join(format!("{encoded}.json"))
    }

    /// Read the legacy flat store, if one exists. A file that exists but does
    /// not parse is reported so the operator can inspect it; it is never
    /// deleted here.
    pub async fn load_legacy(&self) -> Result<Option<HashMap<String, LegacyValue>>, StoreError> {
        let path = self.data_dir.join(LEGACY_STORE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).await?;
        let map: HashMap<String, LegacyValue> = serde_json::from_str(&raw)?;
        Ok(Some(map))
    }

    /// Delete the legacy flat store. Called only after the migrated records
    /// have been confirmed durable.
    pub async fn remove_legacy(&self) -> Result<(), StoreError> {
        let path = self.data_dir.join(LEGACY_STORE_FILE);
        if path.exists() {
            fs::remove_file(&path).await?;
            debug!(path = %path.display(), "Removed legacy store");
        }
        Ok(())
    }

    /// Walk every shard directory, yielding record file paths.
    async fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        let mut shards = fs::read_dir(&self.data_dir).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.metadata().await?.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    async fn read_record(path: &Path) -> Result<Option<CacheRecord>, StoreError> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                // A corrupt file loses one record, not the whole store.
                warn!(path = %path.display(), error = %err, "Skipping corrupt record file");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl RecordStore for DiskStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<CacheRecord>, StoreError> {
        let mut found = Vec::new();
        for key in keys {
            if let Some(record) = Self::read_record(&self.record_path(key)).await? {
                found.push(record);
            }
        }
        Ok(found)
    }

    async fn set_many(&self, records: Vec<CacheRecord>) -> Result<(), StoreError> {
        for record in &records {
            let path = self.record_path(&record.key);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let body = serde_json::to_vec(record)?;
            fs::write(&path, body).await?;
        }
        debug!(count = records.len(), "Wrote record batch");
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StoreError> {
        for key in keys {
            let path = self.record_path(key);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CacheRecord>, StoreError> {
        let mut records = Vec::new();
        for path in self.record_files().await? {
            if let Some(record) = Self::read_record(&path).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for path in self.record_files().await? {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(key) = hex_decode(stem) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        for path in self.record_files().await? {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

fn hex_encode(key: &str) -> String {
    key.bytes().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(encoded: &str) -> Option<String> {
    if encoded.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(encoded.len() / 2);
    for i in (0..encoded.len()).step_by(2) {
        bytes.push(u8::from_str_radix(&encoded[i..i + 2], 16).ok()?);
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hex_roundtrip() {
        for key in ["@alice", "@名前", "plain"] {
            assert_eq!(hex_decode(&hex_encode(key)).as_deref(), Some(key));
        }
        assert!(hex_decode("0").is_none());
    }

    #[tokio::test]
    async fn test_disk_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = DiskStore::open(tmp.path()).await.unwrap();

        store
            .set_many(vec![
                CacheRecord::new("@alice", "Alice", 1200),
                CacheRecord::new("@bob", "Bob", 0),
            ])
            .await
            .unwrap();

        let got = store.get("@alice").await.unwrap().unwrap();
        assert_eq!(got.display_name, "Alice");
        assert_eq!(got.metric, 1200);

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["@alice", "@bob"]);
        assert_eq!(store.count().await.unwrap(), 2);

        store.delete_many(&["@alice".to_string()]).await.unwrap();
        assert!(store.get("@alice").await.unwrap().is_none());

        store.clear().await.unwrap();
        assert_eq!(store.entries().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_legacy_load_and_remove() {
        let tmp = TempDir::new().unwrap();
        let legacy = r#"{"@a": "Alice", "@b": {"name": "Bob", "subs": 500, "ts": 123}}"#;
        std::fs::write(tmp.path().join(LEGACY_STORE_FILE), legacy).unwrap();

        let store = DiskStore::open(tmp.path()).await.unwrap();
        let map = store.load_legacy().await.unwrap().unwrap();
        assert_eq!(map.len(), 2);
        assert!(matches!(map.get("@a"), Some(LegacyValue::Name(n)) if n == "Alice"));

        store.remove_legacy().await.unwrap();
        assert!(store.load_legacy().await.unwrap().is_none());
    }
}
