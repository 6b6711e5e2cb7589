//! Health monitor: a persisted circuit breaker.
//!
//! Tracks consecutive upstream failures. A rate-limit signal increments the
//! counter by a configurable weight (it is an unambiguous throttling signal);
//! any success resets it to zero. At the threshold the breaker trips and all
//! new lookups are rejected until the cool-down elapses or an operator resets
//! it. State is persisted to a well-known file so a restarted process resumes
//! tripped instead of immediately hammering a still-hostile upstream.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::cache::record::now_ms;
use crate::config::SharedConfig;

/// File name of the persisted breaker state inside the data directory.
pub const BREAKER_STATE_FILE: &str = "breaker.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerStatus {
    Normal,
    Tripped,
}

/// The persisted breaker record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerState {
    pub status: BreakerStatus,
    pub reason: Option<String>,
    pub tripped_at: Option<u64>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            status: BreakerStatus::Normal,
            reason: None,
            tripped_at: None,
        }
    }
}

struct Inner {
    error_count: u32,
    state: BreakerState,
}

/// Shared circuit breaker. All mutation goes through this one instance.
pub struct CircuitBreaker {
    config: SharedConfig,
    inner: Mutex<Inner>,
    persist_path: Option<PathBuf>,
}

impl CircuitBreaker {
    /// In-memory breaker (tests, ephemeral deployments).
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                error_count: 0,
                state: BreakerState::default(),
            }),
            persist_path: None,
        }
    }

    /// Breaker persisted under `data_dir`, restoring any previous state.
    pub async fn open(config: SharedConfig, data_dir: &std::path::Path) -> Self {
        let path = data_dir.join(BREAKER_STATE_FILE);
        let state = match fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<BreakerState>(&raw) {
                Ok(state) => state,
                Err(err) => {
                    warn!(error = %err, "Corrupt breaker state, starting normal");
                    BreakerState::default()
                }
            },
            Err(_) => BreakerState::default(),
        };

        if state.status == BreakerStatus::Tripped {
            info!(reason = ?state.reason, "Resuming with breaker tripped");
        }

        Self {
            config,
            inner: Mutex::new(Inner {
                error_count: 0,
                state,
            }),
            persist_path: Some(path),
        }
    }

    /// Whether new lookups must be rejected. A tripped breaker whose
    /// cool-down has elapsed flips back to normal here, with the error
    /// counter cleared.
    pub async fn is_open(&self) -> bool {
        let cooldown_ms = self.config.read().await.breaker.cooldown_secs * 1000;

        let recovered = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state.status {
                BreakerStatus::Normal => return false,
                BreakerStatus::Tripped => {
                    let tripped_at = inner.state.tripped_at.unwrap_or(0);
                    if now_ms().saturating_sub(tripped_at) >= cooldown_ms {
                        inner.state = BreakerState::default();
                        inner.error_count = 0;
                        true
                    } else {
                        return true;
                    }
                }
            }
        };

        if recovered {
            info!("Breaker cool-down elapsed, resuming lookups");
            self.persist().await;
        }
        false
    }

    /// Record a failure with the given weight. Returns true when this call
    /// tripped the breaker.
    pub async fn record_failure(&self, weight: u32, reason: &str) -> bool {
        let threshold = self.config.read().await.breaker.threshold;
        let (tripped, count) = {
            let mut inner = self.inner.lock().unwrap();
            inner.error_count += weight;
            let should_trip =
                inner.error_count >= threshold && inner.state.status == BreakerStatus::Normal;
            if should_trip {
                inner.state = BreakerState {
                    status: BreakerStatus::Tripped,
                    reason: Some(reason.to_string()),
                    tripped_at: Some(now_ms()),
                };
            }
            (should_trip, inner.error_count)
        };

        if tripped {
            warn!(count, threshold, reason, "Circuit breaker tripped");
            self.persist().await;
        } else {
            warn!(count, threshold, reason, "Upstream failure recorded");
        }
        tripped
    }

    /// A successful fetch clears the error count outright; recovery is
    /// immediate, not gradual.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.error_count > 0 {
            inner.error_count = 0;
        }
    }

    /// Operator-initiated reset to normal.
    pub async fn reset(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.error_count = 0;
            inner.state = BreakerState::default();
        }
        info!("Breaker manually reset");
        self.persist().await;
    }

    /// Current error count (consulted by the burst-pacing decision).
    pub fn error_count(&self) -> u32 {
        self.inner.lock().unwrap().error_count
    }

    /// Snapshot of the persisted state shape.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state.clone()
    }

    async fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let snapshot = self.state();
        let body = match serde_json::to_vec(&snapshot) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "Failed to serialize breaker state");
                return;
            }
        };
        if let Err(err) = fs::write(path, body).await {
            warn!(error = %err, path = %path.display(), "Failed to persist breaker state");
        }
    }
}
