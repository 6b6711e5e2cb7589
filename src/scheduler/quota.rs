//! Per-consumer burst quotas.
//!
//! A consumer context (e.g. one UI surface) earns a burst allowance when it
//! signals a fresh user interaction. While the allowance lasts, and the
//! breaker has seen zero recent errors, that consumer's lookups dispatch on
//! the short burst delay instead of the base pacing range. Contexts that
//! never signalled an interaction have no allowance.

use std::collections::HashMap;

/// Transient burst bookkeeping, keyed by consumer context id.
#[derive(Debug, Default)]
pub struct QuotaBook {
    remaining: HashMap<String, u32>,
}

impl QuotaBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a consumer's allowance to the configured maximum.
    pub fn reset(&mut self, consumer: &str, max: u32) {
        self.remaining.insert(consumer.to_string(), max);
    }

    /// Remaining burst units for a consumer (zero when never granted).
    pub fn remaining(&self, consumer: &str) -> u32 {
        self.remaining.get(consumer).copied().unwrap_or(0)
    }

    /// Consume one unit on dispatch. Returns false when no allowance is left.
    pub fn consume(&mut self, consumer: &str) -> bool {
        match self.remaining.get_mut(consumer) {
            Some(units) if *units > 0 => {
                *units -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drop all bookkeeping for a closed context, bounding memory growth.
    pub fn release(&mut self, consumer: &str) {
        self.remaining.remove(consumer);
    }

    /// Number of tracked contexts.
    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_lifecycle() {
        let mut quotas = QuotaBook::new();
        assert_eq!(quotas.remaining("tab-1"), 0);
        assert!(!quotas.consume("tab-1"));

        quotas.reset("tab-1", 2);
        assert!(quotas.consume("tab-1"));
        assert!(quotas.consume("tab-1"));
        assert!(!quotas.consume("tab-1"));

        quotas.reset("tab-1", 2);
        assert_eq!(quotas.remaining("tab-1"), 2);

        quotas.release("tab-1");
        assert!(quotas.is_empty());
    }
}
