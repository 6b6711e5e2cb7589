//! Bounded least-recently-used memory tier.
//!
//! Strict LRU: every get promotes, insertion counts as a use, and inserting
//! into a full cache evicts the least recently used entry.

use std::collections::HashMap;

use crate::cache::record::CacheRecord;

/// Fixed-capacity LRU map keyed by handle.
pub struct LruCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (u64, CacheRecord)>,
}

impl LruCache {
    /// Create a cache holding at most `capacity` entries. A zero capacity is
    /// treated as 1 so insertion always succeeds.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up a record, promoting it on hit.
    pub fn get(&mut self, key: &str) -> Option<CacheRecord> {
        let tick = self.next_tick();
        let (stamp, record) = self.entries.get_mut(key)?;
        *stamp = tick;
        Some(record.clone())
    }

    /// Insert or overwrite a record, evicting the least recently used entry
    /// if the cache is full. Returns the evicted record's key, if any.
    pub fn insert(&mut self, record: CacheRecord) -> Option<String> {
        let tick = self.next_tick();
        let key = record.key.clone();

        let evicted = if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.entries.insert(key, (tick, record));
        evicted
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (stamp, _))| *stamp)
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&oldest);
        Some(oldest)
    }

    /// Remove a single entry.
    pub fn remove(&mut self, key: &str) -> Option<CacheRecord> {
        self.entries.remove(key).map(|(_, record)| record)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> CacheRecord {
        CacheRecord::new(key, key.trim_start_matches('@'), 0)
    }

    #[test]
    fn test_insert_evicts_least_recently_used() {
        let mut lru = LruCache::new(2);
        lru.insert(record("@a"));
        lru.insert(record("@b"));

        let evicted = lru.insert(record("@c"));
        assert_eq!(evicted.as_deref(), Some("@a"));
        assert!(lru.get("@a").is_none());
        assert!(lru.get("@b").is_some());
        assert!(lru.get("@c").is_some());
    }

    #[test]
    fn test_get_promotes() {
        let mut lru = LruCache::new(2);
        lru.insert(record("@a"));
        lru.insert(record("@b"));

        // Touch @a so @b becomes the eviction victim.
        assert!(lru.get("@a").is_some());
        let evicted = lru.insert(record("@c"));
        assert_eq!(evicted.as_deref(), Some("@b"));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut lru = LruCache::new(2);
        lru.insert(record("@a"));
        lru.insert(record("@b"));

        assert!(lru.insert(record("@a")).is_none());
        assert_eq!(lru.len(), 2);
    }
}
