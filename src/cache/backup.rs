//! Checksummed cache backup export and import.
//!
//! Exports carry a SHA-256 checksum over the canonical (recursively
//! key-sorted, compact) JSON form of the data map. Imports verify that
//! checksum and surface a mismatch to the caller for an explicit trust
//! decision; nothing is written unless the caller overrides.
//!
//! Two import modes mirror the operator workflow:
//! - *trusted*: original timestamps are kept, except entries carrying a
//!   positive metric or a future timestamp, which are stamped force-expired
//!   so the metric refreshes on next sighting.
//! - *safe*: every entry is stamped force-expired.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::cache::manager::SharedCache;
use crate::cache::record::{now_ms, CacheRecord};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("checksum mismatch: declared {declared}, computed {computed}")]
    ChecksumMismatch { declared: String, computed: String },

    #[error("malformed backup: {0}")]
    Format(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A complete backup file.
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupFile {
    pub meta: BackupMeta,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupMeta {
    pub version: String,
    pub generated_at: u64,
    pub checksum: String,
}

/// Options governing an import.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Keep original timestamps where safe (see module docs).
    pub trusted: bool,
    /// Proceed despite a checksum mismatch. The mismatch is still logged.
    pub allow_mismatch: bool,
}

/// One value inside a backup's data map. Accepts the current record shape as
/// well as the legacy shapes older backups contain.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BackupValue {
    Name(String),
    Record {
        #[serde(alias = "name")]
        display_name: String,
        #[serde(default, alias = "subs")]
        metric: u64,
        #[serde(default, alias = "ts")]
        updated_at: u64,
    },
}

/// SHA-256 over the canonical JSON form of `data`, hex-encoded.
pub fn checksum(data: &BTreeMap<String, Value>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in data {
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical_json(value).as_bytes());
        hasher.update(b"\0");
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compact JSON with every object's keys sorted, so semantically equal
/// values hash equally regardless of original member order.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, canonical_json(v)))
                .collect();
            let body: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// Export the full cache (durable plus buffered writes) as a backup file.
pub async fn export_backup(cache: &SharedCache) -> Result<BackupFile, StoreError> {
    let snapshot = cache.snapshot().await?;
    let mut data = BTreeMap::new();
    for (key, record) in snapshot {
        // Serializing a CacheRecord cannot fail.
        data.insert(key, serde_json::to_value(record).unwrap_or(Value::Null));
    }

    let checksum = checksum(&data);
    Ok(BackupFile {
        meta: BackupMeta {
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: now_ms(),
            checksum,
        },
        data,
    })
}

/// Import a backup, merging its entries over the current cache. Returns the
/// number of records written. Performs no writes when the checksum does not
/// match, unless `allow_mismatch` is set.
pub async fn import_backup(
    cache: &SharedCache,
    backup: BackupFile,
    options: ImportOptions,
) -> Result<usize, ImportError> {
    let computed = checksum(&backup.data);
    if computed != backup.meta.checksum {
        if !options.allow_mismatch {
            return Err(ImportError::ChecksumMismatch {
                declared: backup.meta.checksum,
                computed,
            });
        }
        tracing::warn!(
            declared = %backup.meta.checksum,
            computed = %computed,
            "Importing despite checksum mismatch"
        );
    }

    let ttl_ms = cache.ttl_ms().await;
    let now = now_ms();
    let forced_expired = now.saturating_sub(ttl_ms + 60_000);

    let mut records = Vec::new();
    for (key, value) in backup.data {
        let parsed: BackupValue = serde_json::from_value(value)?;
        let (display_name, metric, original_ts) = match parsed {
            BackupValue::Name(name) => (name, 0, 0),
            BackupValue::Record {
                display_name,
                metric,
                updated_at,
            } => (display_name, metric, updated_at),
        };
        if display_name.is_empty() {
            continue;
        }

        let updated_at = if options.trusted {
            let ts = if original_ts == 0 { now } else { original_ts };
            if ts > now || metric > 0 {
                // Future stamps are anomalous; metric-bearing entries are
                // force-expired so the metric refreshes on next sighting.
                forced_expired
            } else {
                ts
            }
        } else {
            forced_expired
        };

        records.push(CacheRecord {
            key,
            display_name,
            metric,
            updated_at,
        });
    }

    let count = records.len();
    for record in &records {
        cache.put(record.clone()).await;
    }
    // Imports are explicit operator actions; make them durable before
    // reporting success.
    cache.flush().await;

    info!(count, trusted = options.trusted, "Imported backup");
    Ok(count)
}
