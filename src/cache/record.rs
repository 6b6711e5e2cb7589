//! Cache record type and staleness derivation.
//!
//! A record maps an external handle to its resolved display name and
//! popularity metric. Freshness is derived from `updated_at` against the
//! configured TTL, never stored.

use serde::{Deserialize, Serialize};

/// One resolved handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// The external handle this record resolves (e.g. "@alice").
    pub key: String,

    /// Resolved display name.
    pub display_name: String,

    /// Popularity metric (e.g. subscriber count). Never negative.
    pub metric: u64,

    /// Milliseconds since the Unix epoch at the last successful refresh.
    /// Non-decreasing per key across normal refreshes.
    pub updated_at: u64,
}

impl CacheRecord {
    /// Create a record stamped with the current time.
    pub fn new(key: impl Into<String>, display_name: impl Into<String>, metric: u64) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            metric,
            updated_at: now_ms(),
        }
    }

    /// Whether this record's age exceeds the TTL. An age exactly equal to the
    /// TTL is still fresh.
    pub fn is_stale(&self, ttl_ms: u64) -> bool {
        self.is_stale_at(ttl_ms, now_ms())
    }

    /// Staleness against an explicit clock value.
    pub fn is_stale_at(&self, ttl_ms: u64, now: u64) -> bool {
        now.saturating_sub(self.updated_at) > ttl_ms
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(ts: u64) -> CacheRecord {
        CacheRecord {
            key: "@alice".to_string(),
            display_name: "Alice".to_string(),
            metric: 1200,
            updated_at: ts,
        }
    }

    #[test]
    fn test_staleness_boundaries() {
        let ttl = 1000;
        let rec = record_at(5000);

        // Age below, at, and just past the TTL.
        assert!(!rec.is_stale_at(ttl, 5500));
        assert!(!rec.is_stale_at(ttl, 6000));
        assert!(rec.is_stale_at(ttl, 6001));
    }

    #[test]
    fn test_clock_behind_update_is_fresh() {
        let rec = record_at(10_000);
        assert!(!rec.is_stale_at(1000, 9000));
    }
}
