//! handle-cache: fetch orchestration and tiered caching for social handles.
//!
//! Resolves external handles (e.g. "@alice") to their display name and
//! popularity metric, caching results through a hierarchy:
//!   LRU memory tier → write buffer → sharded on-disk store
//!
//! Upstream fetches flow through one paced scheduler with per-key
//! coalescing, priority queues, per-consumer burst quotas, and a persisted
//! circuit breaker. An HTTP API exposes lookups, cache administration, and
//! checksummed backup transfer.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod scheduler;
pub mod server;
pub mod store;
