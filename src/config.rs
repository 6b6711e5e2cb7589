//! Runtime configuration for handle-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All pacing, TTL, and breaker knobs live here. The running service holds the
//! config behind a [`SharedConfig`] and re-reads it on every scheduling and
//! staleness decision, so settings changes apply without a restart.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "handle-cache", about = "Handle-enrichment fetch/cache service")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address; overrides the configured one.
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Durable storage settings.
    pub storage: StorageConfig,

    /// Cache tiering and expiry settings.
    pub cache: CacheConfig,

    /// Request pacing settings.
    pub pacing: PacingConfig,

    /// Circuit breaker tuning.
    pub breaker: BreakerConfig,

    /// Upstream fetch settings.
    pub fetch: FetchConfig,
}

/// Shared, hot-reloadable view of the configuration.
pub type SharedConfig = Arc<RwLock<Config>>;

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the sharded record files, breaker state, and any
    /// legacy flat store awaiting migration.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/handle-cache"),
        }
    }
}

/// Cache tiering and expiry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries held in the in-memory LRU tier.
    pub memory_capacity: usize,

    /// Records older than this are stale and refresh in the background.
    pub ttl_days: u64,

    /// Durable records older than this are pruned outright.
    pub delete_age_days: u64,

    /// Quiet period after the last buffered write before flushing to disk.
    pub flush_debounce_ms: u64,

    /// Buffered-write ceiling that forces an immediate flush.
    pub flush_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 1000,
            ttl_days: 15,
            delete_age_days: 30,
            flush_debounce_ms: 2000,
            flush_batch_limit: 50,
        }
    }
}

/// Named base-delay presets. Slow mode trades latency for a lower risk of
/// tripping upstream throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedPreset {
    Normal,
    Slow,
}

impl SpeedPreset {
    /// Inclusive `[min, max]` delay range in milliseconds.
    pub fn range_ms(&self) -> (u64, u64) {
        match self {
            SpeedPreset::Normal => (1200, 2500),
            SpeedPreset::Slow => (3500, 6000),
        }
    }
}

/// Request pacing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Base delay preset sampled per dispatch.
    pub preset: SpeedPreset,

    /// Explicit `[min, max]` base range in milliseconds; overrides the
    /// preset when set.
    pub base_override_ms: Option<(u64, u64)>,

    /// Minimum delay while a consumer's burst quota lasts, in milliseconds.
    pub burst_min_ms: u64,

    /// Maximum delay while a consumer's burst quota lasts, in milliseconds.
    pub burst_max_ms: u64,

    /// Fast dispatches granted per consumer interaction.
    pub burst_quota: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            preset: SpeedPreset::Normal,
            base_override_ms: None,
            burst_min_ms: 150,
            burst_max_ms: 400,
            burst_quota: 5,
        }
    }
}

impl PacingConfig {
    /// Inclusive base delay range in milliseconds for the active preset.
    pub fn base_range_ms(&self) -> (u64, u64) {
        self.base_override_ms.unwrap_or_else(|| self.preset.range_ms())
    }

    /// Inclusive burst delay range in milliseconds.
    pub fn burst_range_ms(&self) -> (u64, u64) {
        (self.burst_min_ms, self.burst_max_ms)
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Error count at which the breaker trips.
    pub threshold: u32,

    /// How long the breaker stays tripped before resuming.
    pub cooldown_secs: u64,

    /// Error-count increment for an explicit rate-limit signal. Throttling is
    /// an unambiguous signal, so it weighs more than a generic failure.
    pub rate_limit_weight: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown_secs: 300,
            rate_limit_weight: 2,
        }
    }
}

/// Upstream fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Profile page URL template; `{handle}` is replaced with the
    /// URL-encoded handle (leading `@` stripped).
    pub profile_url_template: String,

    /// Hard per-attempt timeout in seconds. There are no retries; a timed-out
    /// lookup resolves as a transport error.
    pub timeout_secs: u64,

    /// Accept-Language header, pinned so the parser sees a stable locale.
    pub accept_language: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            profile_url_template: "https://www.youtube.com/@{handle}".to_string(),
            timeout_secs: 20,
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

/// Settings that may be changed at runtime through the API. Fields left unset
/// keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub ttl_days: Option<u64>,
    pub delete_age_days: Option<u64>,
    pub preset: Option<SpeedPreset>,
    pub burst_quota: Option<u32>,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for
    /// missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// TTL in milliseconds, the unit record timestamps use.
    pub fn ttl_ms(&self) -> u64 {
        self.cache.ttl_days * 24 * 60 * 60 * 1000
    }

    /// Deletion age in milliseconds.
    pub fn delete_age_ms(&self) -> u64 {
        self.cache.delete_age_days * 24 * 60 * 60 * 1000
    }

    /// Apply a runtime settings patch. Returns true if the deletion age
    /// changed, which re-triggers pruning.
    pub fn apply_patch(&mut self, patch: &SettingsPatch) -> bool {
        if let Some(ttl) = patch.ttl_days {
            self.cache.ttl_days = ttl;
        }
        if let Some(preset) = patch.preset {
            self.pacing.preset = preset;
        }
        if let Some(quota) = patch.burst_quota {
            self.pacing.burst_quota = quota;
        }
        match patch.delete_age_days {
            Some(age) if age != self.cache.delete_age_days => {
                self.cache.delete_age_days = age;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.ttl_days, 15);
        assert_eq!(cfg.breaker.threshold, 3);
        assert_eq!(cfg.pacing.base_range_ms(), (1200, 2500));
    }

    #[test]
    fn test_preset_ranges() {
        assert_eq!(SpeedPreset::Slow.range_ms(), (3500, 6000));
        let mut cfg = Config::default();
        cfg.pacing.preset = SpeedPreset::Slow;
        assert_eq!(cfg.pacing.base_range_ms(), (3500, 6000));
    }

    #[test]
    fn test_patch_reports_prune_trigger() {
        let mut cfg = Config::default();
        let patch = SettingsPatch {
            ttl_days: Some(7),
            ..Default::default()
        };
        assert!(!cfg.apply_patch(&patch));
        assert_eq!(cfg.cache.ttl_days, 7);

        let patch = SettingsPatch {
            delete_age_days: Some(10),
            ..Default::default()
        };
        assert!(cfg.apply_patch(&patch));
        assert_eq!(cfg.cache.delete_age_days, 10);
    }
}
