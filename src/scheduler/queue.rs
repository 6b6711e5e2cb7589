//! Coalescing priority queues.
//!
//! One [`Task`] exists per in-flight key. A second request for the same key
//! attaches to the existing task's waiter list instead of creating a new
//! task; a high-priority request for a key queued at low priority promotes
//! it to the front of the high queue. High-priority tasks are served
//! newest-first (what the user is looking at right now beats older queued
//! items); low-priority refreshes are FIFO.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::cache::record::now_ms;
use crate::scheduler::{LookupError, LookupOutcome};

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Currently visible to a user.
    High,
    /// Background refresh of a stale record.
    Low,
}

/// What each waiter eventually receives.
pub type TaskResult = Result<LookupOutcome, LookupError>;

/// One in-flight key and everyone waiting on it.
#[derive(Debug)]
pub struct Task {
    pub key: String,
    pub priority: Priority,
    pub waiters: Vec<oneshot::Sender<TaskResult>>,
    pub consumer: Option<String>,
    pub enqueued_at: u64,
    /// Popped from the queue and handed to the executor; no longer in either
    /// queue but still coalescing new waiters.
    pub in_flight: bool,
}

/// How a submission was absorbed (used for logging and tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Enqueued,
    Coalesced,
    Promoted,
}

/// The two queues plus the per-key task map.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: HashMap<String, Task>,
    high: VecDeque<String>,
    low: VecDeque<String>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a waiter for `key`, creating, coalescing into, or promoting
    /// the task as needed.
    pub fn submit(
        &mut self,
        key: &str,
        priority: Priority,
        consumer: Option<String>,
        waiter: oneshot::Sender<TaskResult>,
    ) -> Disposition {
        if let Some(task) = self.tasks.get_mut(key) {
            task.waiters.push(waiter);

            if priority == Priority::High && task.priority == Priority::Low && !task.in_flight {
                task.priority = Priority::High;
                // Burst accounting follows the most recently interested
                // consumer.
                task.consumer = consumer;
                self.low.retain(|queued| queued != key);
                self.high.push_front(key.to_string());
                return Disposition::Promoted;
            }

            if consumer.is_some() {
                task.consumer = consumer;
            }
            return Disposition::Coalesced;
        }

        self.tasks.insert(
            key.to_string(),
            Task {
                key: key.to_string(),
                priority,
                waiters: vec![waiter],
                consumer,
                enqueued_at: now_ms(),
                in_flight: false,
            },
        );
        match priority {
            Priority::High => self.high.push_front(key.to_string()),
            Priority::Low => self.low.push_back(key.to_string()),
        }
        Disposition::Enqueued
    }

    /// The key and consumer context next in line, high queue first.
    pub fn peek(&self) -> Option<(&str, Option<&str>)> {
        let key = self.high.front().or_else(|| self.low.front())?;
        let task = self.tasks.get(key)?;
        Some((key.as_str(), task.consumer.as_deref()))
    }

    /// Remove the head task from its queue and mark it in flight, returning
    /// its key and consumer context. The task stays in the map so late
    /// requests still coalesce onto it.
    pub fn pop(&mut self) -> Option<(String, Option<String>)> {
        let key = self.high.pop_front().or_else(|| self.low.pop_front())?;
        let consumer = match self.tasks.get_mut(&key) {
            Some(task) => {
                task.in_flight = true;
                task.consumer.clone()
            }
            None => None,
        };
        Some((key, consumer))
    }

    /// Destroy the task for `key`, returning its waiters for resolution.
    pub fn resolve(&mut self, key: &str) -> Vec<oneshot::Sender<TaskResult>> {
        self.tasks
            .remove(key)
            .map(|task| task.waiters)
            .unwrap_or_default()
    }

    /// Drop every task (queued and in flight), returning all waiters.
    /// Used when the breaker trips: resuming into a still-hostile upstream
    /// is worse than dropping stale requests.
    pub fn clear_all(&mut self) -> Vec<oneshot::Sender<TaskResult>> {
        self.high.clear();
        self.low.clear();
        self.tasks
            .drain()
            .flat_map(|(_, task)| task.waiters)
            .collect()
    }

    /// Queued (not in-flight) task counts: `(high, low)`.
    pub fn depths(&self) -> (usize, usize) {
        (self.high.len(), self.low.len())
    }

    /// Whether a queued or in-flight task exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiter() -> (
        oneshot::Sender<TaskResult>,
        oneshot::Receiver<TaskResult>,
    ) {
        oneshot::channel()
    }

    fn pop_key(queue: &mut TaskQueue) -> Option<String> {
        queue.pop().map(|(key, _)| key)
    }

    #[test]
    fn test_high_queue_is_newest_first() {
        let mut queue = TaskQueue::new();
        queue.submit("@a", Priority::High, None, waiter().0);
        queue.submit("@b", Priority::High, None, waiter().0);

        assert_eq!(pop_key(&mut queue).as_deref(), Some("@b"));
        assert_eq!(pop_key(&mut queue).as_deref(), Some("@a"));
    }

    #[test]
    fn test_low_queue_is_fifo_and_served_after_high() {
        let mut queue = TaskQueue::new();
        queue.submit("@l1", Priority::Low, None, waiter().0);
        queue.submit("@l2", Priority::Low, None, waiter().0);
        queue.submit("@h", Priority::High, None, waiter().0);

        assert_eq!(pop_key(&mut queue).as_deref(), Some("@h"));
        assert_eq!(pop_key(&mut queue).as_deref(), Some("@l1"));
        assert_eq!(pop_key(&mut queue).as_deref(), Some("@l2"));
    }

    #[test]
    fn test_duplicate_submission_coalesces() {
        let mut queue = TaskQueue::new();
        assert_eq!(
            queue.submit("@a", Priority::High, None, waiter().0),
            Disposition::Enqueued
        );
        assert_eq!(
            queue.submit("@a", Priority::High, None, waiter().0),
            Disposition::Coalesced
        );

        assert_eq!(queue.depths(), (1, 0));
        assert_eq!(queue.resolve("@a").len(), 2);
    }

    #[test]
    fn test_high_promotes_queued_low_to_front() {
        let mut queue = TaskQueue::new();
        queue.submit("@bg", Priority::Low, None, waiter().0);
        queue.submit("@other", Priority::High, None, waiter().0);
        assert_eq!(
            queue.submit("@bg", Priority::High, Some("tab-9".into()), waiter().0),
            Disposition::Promoted
        );

        // Promoted task jumps the existing high entry and leaves no
        // duplicate behind in the low queue. Popping yields the consumer
        // the task currently belongs to.
        assert_eq!(queue.depths(), (2, 0));
        let (key, consumer) = queue.pop().unwrap();
        assert_eq!(key, "@bg");
        assert_eq!(consumer.as_deref(), Some("tab-9"));
        assert_eq!(pop_key(&mut queue).as_deref(), Some("@other"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_in_flight_task_still_coalesces() {
        let mut queue = TaskQueue::new();
        queue.submit("@a", Priority::Low, None, waiter().0);
        queue.pop();

        assert_eq!(
            queue.submit("@a", Priority::High, None, waiter().0),
            Disposition::Coalesced
        );
        // Nothing re-queued; the in-flight fetch will resolve both.
        assert!(queue.is_empty());
        assert_eq!(queue.resolve("@a").len(), 2);
    }

    #[test]
    fn test_clear_all_returns_every_waiter() {
        let mut queue = TaskQueue::new();
        queue.submit("@a", Priority::High, None, waiter().0);
        queue.submit("@a", Priority::High, None, waiter().0);
        queue.submit("@b", Priority::Low, None, waiter().0);

        let waiters = queue.clear_all();
        assert_eq!(waiters.len(), 3);
        assert!(queue.is_empty());
        assert!(!queue.contains("@a"));
    }
}
