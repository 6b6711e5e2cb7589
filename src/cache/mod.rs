//! Tiered record cache.
//!
//! This module contains the cache data structures and policies:
//! - [`record`]: CacheRecord and derived staleness
//! - [`lru`]: bounded strict-LRU memory tier
//! - [`manager`]: read/write orchestration across memory, buffer, and store
//! - [`backup`]: checksummed export/import of the full cache

pub mod backup;
pub mod lru;
pub mod manager;
pub mod record;
