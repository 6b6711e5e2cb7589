//! Task scheduling and upstream protection.
//!
//! - [`queue`]: coalescing priority queues (high = newest-first, low = FIFO)
//! - [`quota`]: per-consumer burst allowances
//! - [`breaker`]: persisted circuit breaker
//! - [`dispatch`]: the scheduler: submit, pacing, and the consumer loop

pub mod breaker;
pub mod dispatch;
pub mod queue;
pub mod quota;

use thiserror::Error;

use crate::cache::record::CacheRecord;

/// Result of a lookup as seen by a waiter.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// A resolved, freshly cached record.
    Found(CacheRecord),
    /// The lookup succeeded but the handle has no data. Not an error.
    Missing,
}

/// Expected failure modes of a lookup. These are ordinary return values,
/// never panics; only programmer errors propagate as hard failures.
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    /// Rejected before any network attempt because the breaker is tripped.
    #[error("circuit breaker open")]
    BreakerOpen,

    /// Upstream throttling ended this lookup.
    #[error("upstream rate limit")]
    RateLimited,

    /// Timeout, network failure, or malformed response.
    #[error("transport error: {0}")]
    Transport(String),
}
