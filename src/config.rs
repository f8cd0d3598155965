//! # Configuration
//!
//! Layered configuration loading, mirroring the platform's `Config::from_env`
//! pattern: environment variables prefixed `TIMELINE__<SECTION>__<KEY>`
//! override compiled-in defaults, with an explicit `validate()` pass run
//! once at `start`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration for a service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batching: BatchingConfig,
    pub retry: RetryConfig,
    pub shutdown: ShutdownConfig,
    pub acls: AclConfig,
    pub timeline: TimelineConfig,
    pub extensions: ExtensionConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batching: BatchingConfig::default(),
            retry: RetryConfig::default(),
            shutdown: ShutdownConfig::default(),
            acls: AclConfig::default(),
            timeline: TimelineConfig::default(),
            extensions: ExtensionConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// `timeline.batch.size`: events per entity flush.
    pub batch_size: usize,
    /// `timeline.post.limit`: added to `batch_size` to get the absolute
    /// queued-event cap, unless `post_queue_limit_override` is set.
    pub post_limit_extra: usize,
    /// Escape hatch for callers (chiefly tests) that need an absolute
    /// `postQueueLimit` decoupled from `batch_size`, e.g. the documented
    /// boundary case of `postQueueLimit=0` with a nonzero batch size.
    pub post_queue_limit_override: Option<usize>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            post_limit_extra: 10_000,
            post_queue_limit_override: None,
        }
    }
}

impl BatchingConfig {
    pub fn post_queue_limit(&self) -> usize {
        self.post_queue_limit_override
            .unwrap_or(self.batch_size + self.post_limit_extra)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// `timeline.post.retry.interval`: initial retry delay, linear growth.
    pub interval_ms: u64,
    /// `timeline.post.retry.max.interval`: retry delay cap.
    pub max_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            max_interval_ms: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// `timeline.shutdown.waittime`: drain budget.
    pub wait_time_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            wait_time_ms: 30_000,
        }
    }
}

impl ShutdownConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// `ui.acls.enable` / `acls.enable`.
    pub enabled: bool,
    /// `timeline.domain`: override domain id; bypasses ACL computation.
    pub predefined_domain_id: Option<String>,
    /// `admin.acls`.
    pub admin_acls: Vec<String>,
    /// `ui.view.acls`.
    pub view_acls: Vec<String>,
    /// `modify.acls`.
    pub modify_acls: Vec<String>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            predefined_domain_id: None,
            admin_acls: Vec::new(),
            view_acls: Vec::new(),
            modify_acls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Timeline Server base URL.
    pub endpoint: String,
    /// Per-request HTTP timeout.
    pub http_timeout_ms: u64,
    /// `timeline.listen`: register event listener.
    pub listen: bool,
    /// v1.5 protocol mode: emit a paired summary + detail entity per flush.
    pub v1_5_enabled: bool,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8188".to_string(),
            http_timeout_ms: 30_000,
            listen: true,
            v1_5_enabled: false,
        }
    }
}

impl TimelineConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    /// `extension.services`: comma list of plug-in names to load.
    pub services: Vec<String>,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration layered from defaults, an optional file, and
    /// environment variables prefixed `TIMELINE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults).map_err(|e| ConfigError::Load(e.to_string()))?)
            .add_source(
                config::Environment::with_prefix("TIMELINE")
                    .separator("__")
                    .try_parsing(true),
            );

        let loaded = builder.build().map_err(|e| ConfigError::Load(e.to_string()))?;
        loaded
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Fail fast on non-positive durations/sizes, per the lifecycle
    /// controller's `start` step 2.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batching.batch_size == 0 {
            return Err(ConfigError::Invalid("batching.batch_size must be positive".into()));
        }
        if self.retry.interval_ms == 0 && self.retry.max_interval_ms > 0 {
            // A zero retry interval is legal (disables sleeping); nothing to
            // reject here. Kept as an explicit branch because the original
            // treats zero specially rather than as an error.
        }
        if self.timeline.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("timeline.endpoint must not be empty".into()));
        }
        if self.timeline.http_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeline.http_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
