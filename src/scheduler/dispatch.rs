//! The scheduler: request intake, pacing, and the single consumer loop.
//!
//! `submit` answers fresh cache hits immediately; everything else becomes a
//! queued task (coalesced per key). One loop drains the queues, sleeping out
//! a jittered inter-dispatch delay before each lookup so the upstream never
//! sees a fixed cadence. Consumers holding burst quota dispatch on a much
//! shorter delay, but only while the breaker has zero recent errors.
//!
//! Dispatch timing is serialized through one mutex-guarded "last dispatch"
//! instant, so no combination of callers can collectively exceed the pacing
//! budget.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::cache::manager::SharedCache;
use crate::config::SharedConfig;
use crate::fetch::executor::{FetchError, FetchExecutor, FetchOutcome};
use crate::scheduler::breaker::CircuitBreaker;
use crate::scheduler::queue::{Priority, TaskQueue, TaskResult};
use crate::scheduler::quota::QuotaBook;
use crate::scheduler::{LookupError, LookupOutcome};

/// The task scheduler. Shared as `Arc<Scheduler>`; `run` is spawned once.
pub struct Scheduler {
    config: SharedConfig,
    cache: SharedCache,
    breaker: Arc<CircuitBreaker>,
    executor: Arc<dyn FetchExecutor>,
    queue: StdMutex<TaskQueue>,
    quotas: StdMutex<QuotaBook>,
    work_available: Notify,
    last_dispatch: Mutex<Option<Instant>>,
}

/// Thread-safe handle to the scheduler.
pub type SharedScheduler = Arc<Scheduler>;

impl Scheduler {
    pub fn new(
        config: SharedConfig,
        cache: SharedCache,
        breaker: Arc<CircuitBreaker>,
        executor: Arc<dyn FetchExecutor>,
    ) -> Self {
        Self {
            config,
            cache,
            breaker,
            executor,
            queue: StdMutex::new(TaskQueue::new()),
            quotas: StdMutex::new(QuotaBook::new()),
            work_available: Notify::new(),
            last_dispatch: Mutex::new(None),
        }
    }

    /// Request a record for `key`. A fresh cache hit answers immediately
    /// (unless `force_refresh`); otherwise the caller waits on the queued
    /// task for that key. The breaker guards network work only: cached
    /// answers are served even while it is tripped, and a stale record beats
    /// no record when the upstream is off limits.
    pub async fn submit(
        &self,
        key: &str,
        priority: Priority,
        consumer: Option<String>,
        force_refresh: bool,
    ) -> TaskResult {
        let cached = if force_refresh {
            None
        } else {
            match self.cache.get(key).await {
                Ok(hit) => hit,
                Err(err) => {
                    // A broken store read degrades to a network lookup.
                    warn!(key, error = %err, "Cache read failed, falling through to fetch");
                    None
                }
            }
        };

        if let Some(lookup) = &cached {
            if !lookup.stale {
                return Ok(LookupOutcome::Found(lookup.record.clone()));
            }
        }

        if self.breaker.is_open().await {
            if let Some(lookup) = cached {
                return Ok(LookupOutcome::Found(lookup.record));
            }
            return Err(LookupError::BreakerOpen);
        }

        let (tx, rx) = oneshot::channel();
        let disposition = self
            .queue
            .lock()
            .unwrap()
            .submit(key, priority, consumer, tx);
        debug!(key, ?priority, ?disposition, "Lookup queued");
        self.work_available.notify_one();

        rx.await
            .unwrap_or_else(|_| Err(LookupError::Transport("scheduler stopped".to_string())))
    }

    /// Restore a consumer's burst allowance; called when its context signals
    /// a fresh user interaction.
    pub async fn reset_quota(&self, consumer: &str) {
        let max = self.config.read().await.pacing.burst_quota;
        self.quotas.lock().unwrap().reset(consumer, max);
        debug!(consumer, max, "Burst quota reset");
    }

    /// Drop all bookkeeping for a closed consumer context.
    pub fn release_context(&self, consumer: &str) {
        self.quotas.lock().unwrap().release(consumer);
    }

    /// Queued task counts: `(high, low)`.
    pub fn queue_depths(&self) -> (usize, usize) {
        self.queue.lock().unwrap().depths()
    }

    /// Remaining burst units for a consumer context.
    pub fn quota_remaining(&self, consumer: &str) -> u32 {
        self.quotas.lock().unwrap().remaining(consumer)
    }

    /// Whether a dispatch for `consumer` rides the burst delay tier.
    fn burst_eligible(&self, consumer: Option<&str>) -> bool {
        self.breaker.error_count() == 0
            && consumer.is_some_and(|consumer| {
                self.quotas.lock().unwrap().remaining(consumer) > 0
            })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// The consumer loop. Spawned once; runs until the process exits.
    pub async fn run(self: Arc<Self>) {
        loop {
            // Park until a task is queued. The Notified future is created
            // before the emptiness check so a submit between the two cannot
            // be missed.
            loop {
                let notified = self.work_available.notified();
                if !self.queue.lock().unwrap().is_empty() {
                    break;
                }
                notified.await;
            }

            if self.breaker.is_open().await {
                self.fail_all(&LookupError::BreakerOpen);
                continue;
            }

            // Pacing decision for the head task.
            let pacing = self.config.read().await.pacing.clone();
            let (head_key, head_consumer) = {
                let queue = self.queue.lock().unwrap();
                match queue.peek() {
                    Some((key, consumer)) => (key.to_string(), consumer.map(str::to_string)),
                    None => continue,
                }
            };
            let (min_ms, max_ms) = if self.burst_eligible(head_consumer.as_deref()) {
                pacing.burst_range_ms()
            } else {
                pacing.base_range_ms()
            };
            let delay = Duration::from_millis(sample_jitter_ms(min_ms, max_ms));

            let wait = {
                let last = self.last_dispatch.lock().await;
                match *last {
                    Some(prev) => delay.saturating_sub(prev.elapsed()),
                    None => Duration::ZERO,
                }
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            // The queue may have changed while we slept. A different head
            // means the delay tier no longer applies; re-evaluate instead of
            // dispatching another consumer's task on this one's delay.
            let popped = {
                let mut queue = self.queue.lock().unwrap();
                match queue.peek() {
                    Some((key, _)) if key == head_key => queue.pop(),
                    _ => None,
                }
            };
            let Some((key, consumer)) = popped else {
                continue;
            };
            // Charge burst against the consumer whose task is actually
            // dispatched.
            if self.burst_eligible(consumer.as_deref()) {
                if let Some(consumer) = &consumer {
                    self.quotas.lock().unwrap().consume(consumer);
                }
            }
            *self.last_dispatch.lock().await = Some(Instant::now());

            self.execute(&key).await;
        }
    }

    /// One dispatch: run the executor and route the outcome.
    async fn execute(&self, key: &str) {
        debug!(key, "Dispatching lookup");
        match self.executor.execute(key).await {
            Ok(FetchOutcome::Found(profile)) => {
                self.breaker.record_success();
                let record = self
                    .cache
                    .set(key, profile.display_name, profile.metric)
                    .await;
                info!(key, name = %record.display_name, metric = record.metric, "Lookup resolved");
                self.finish(key, Ok(LookupOutcome::Found(record)));
            }
            Ok(FetchOutcome::NotFound) => {
                debug!(key, "Lookup found no data");
                self.finish(key, Ok(LookupOutcome::Missing));
            }
            Err(FetchError::RateLimited) => {
                let weight = self.config.read().await.breaker.rate_limit_weight;
                let tripped = self.breaker.record_failure(weight, "upstream rate limit").await;
                self.finish(key, Err(LookupError::RateLimited));
                if tripped {
                    self.fail_all(&LookupError::BreakerOpen);
                }
            }
            Err(FetchError::Transport(message)) => {
                let tripped = self.breaker.record_failure(1, &message).await;
                self.finish(key, Err(LookupError::Transport(message)));
                if tripped {
                    self.fail_all(&LookupError::BreakerOpen);
                }
            }
        }
    }

    /// Resolve every waiter on `key` with the same result, destroying the
    /// task.
    fn finish(&self, key: &str, result: TaskResult) {
        let waiters = self.queue.lock().unwrap().resolve(key);
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Clear both queues, resolving every pending waiter with `error`.
    fn fail_all(&self, error: &LookupError) {
        let waiters = self.queue.lock().unwrap().clear_all();
        if !waiters.is_empty() {
            warn!(count = waiters.len(), %error, "Clearing pending lookups");
        }
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

/// Uniform sample from the inclusive `[min, max]` millisecond range.
fn sample_jitter_ms(min_ms: u64, max_ms: u64) -> u64 {
    if max_ms <= min_ms {
        return min_ms;
    }
    rand::rng().random_range(min_ms..=max_ms)
}
