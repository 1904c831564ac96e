//! Configuration management.
//!
//! Values come from an optional file plus `APEX_SCHED__*` environment
//! variables (`__` separates nested keys, e.g.
//! `APEX_SCHED__SYNC__REDIS__URL`). Environment values win over the file.

use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::engine::{CronRule, EngineConfig};
use crate::error::{ApexError, Result};
use crate::sync::RedisStoreConfig;
use crate::telemetry::{LogFormat, LoggingConfig, MetricsConfig};

const ENV_PREFIX: &str = "APEX_SCHED";
const ENV_SEPARATOR: &str = "__";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Synchronization store configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Local cron engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Replica daemon behaviour
    #[serde(default)]
    pub replica: ReplicaConfig,

    /// Jobs scheduled by the replica daemon
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

/// Which store backs the synchronized clocks.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncBackendKind {
    /// Process-local; only arbitrates between jobs of one process
    #[default]
    Memory,
    /// Shared Redis server
    Redis,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    /// Store backend
    #[serde(default)]
    pub backend: SyncBackendKind,

    /// Redis settings, used when `backend = "redis"`
    #[serde(default)]
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Connection timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Per-command timeout
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            namespace: default_namespace(),
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl RedisSettings {
    /// Convert into the store's own configuration.
    pub fn to_store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.url.clone(),
            namespace: self.namespace.clone(),
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
        }
    }
}

impl From<&RedisSettings> for RedisStoreConfig {
    fn from(settings: &RedisSettings) -> Self {
        settings.to_store_config()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level or filter directives
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Install the Prometheus exporter
    #[serde(default)]
    pub metrics_enabled: bool,

    /// Prometheus scrape address
    #[serde(default = "crate::telemetry::metrics::default_metrics_listen")]
    pub metrics_listen: SocketAddr,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_enabled: false,
            metrics_listen: crate::telemetry::metrics::default_metrics_listen(),
        }
    }
}

impl ObservabilityConfig {
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            ..Default::default()
        }
    }

    pub fn metrics(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.metrics_enabled,
            listen: self.metrics_listen,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplicaConfig {
    /// Delete job clocks when the replica shuts down.
    ///
    /// Leave off when other replicas keep running the same jobs: a reset
    /// clock lets a peer re-run a tick that was already handled.
    #[serde(default)]
    pub reset_clocks_on_shutdown: bool,
}

/// A job the replica daemon schedules at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDefinition {
    /// Job id, shared by every replica running this job
    pub id: String,

    /// Six-field cron rule
    pub rule: String,

    /// Program and arguments spawned when this replica wins a tick
    #[serde(default)]
    pub command: Vec<String>,
}

// Default value functions
fn default_redis_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_namespace() -> String { "apex-sched".to_string() }
fn default_connect_timeout() -> Duration { Duration::from_secs(5) }
fn default_command_timeout() -> Duration { Duration::from_secs(2) }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check values that deserialization alone cannot.
    pub fn validate(&self) -> Result<()> {
        if self.sync.backend == SyncBackendKind::Redis && self.sync.redis.url.trim().is_empty() {
            return Err(ApexError::invalid_config("sync.redis.url must be set for the redis backend"));
        }
        if self.sync.redis.command_timeout.is_zero() {
            return Err(ApexError::invalid_config("sync.redis.command_timeout must be positive"));
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                return Err(ApexError::invalid_config("job id must not be empty"));
            }
            if !seen.insert(job.id.as_str()) {
                return Err(ApexError::invalid_config(format!("duplicate job id: {}", job.id)));
            }
            CronRule::parse(&job.rule)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.backend, SyncBackendKind::Memory);
        assert_eq!(config.sync.redis.namespace, "apex-sched");
        assert_eq!(config.sync.redis.command_timeout, Duration::from_secs(2));
        assert!(!config.replica.reset_clocks_on_shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let file = write_toml(
            r#"
            [sync]
            backend = "redis"

            [sync.redis]
            url = "redis://cache:6379"
            namespace = "billing"
            command_timeout = "750ms"

            [observability]
            log_format = "compact"

            [[jobs]]
            id = "invoice-run"
            rule = "0 0 2 * * *"
            command = ["/usr/bin/invoice", "--all"]
            "#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sync.backend, SyncBackendKind::Redis);
        assert_eq!(config.sync.redis.namespace, "billing");
        assert_eq!(config.sync.redis.command_timeout, Duration::from_millis(750));
        assert_eq!(config.sync.redis.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.observability.log_format, LogFormat::Compact);
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].command, vec!["/usr/bin/invoice", "--all"]);

        let store = RedisStoreConfig::from(&config.sync.redis);
        assert_eq!(store.url, "redis://cache:6379");
        assert_eq!(store.command_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_rejects_invalid_rule() {
        let file = write_toml(
            r#"
            [[jobs]]
            id = "broken"
            rule = "*/5 * * * *"
            "#,
        );

        let err = Config::from_file(file.path()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCronRule);
    }

    #[test]
    fn test_rejects_duplicate_job_ids() {
        let mut config = Config::default();
        for _ in 0..2 {
            config.jobs.push(JobDefinition {
                id: "dup".to_string(),
                rule: "* * * * * *".to_string(),
                command: Vec::new(),
            });
        }

        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_observability_conversion() {
        let observability = ObservabilityConfig {
            log_level: "debug".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_listen: "127.0.0.1:9100".parse().unwrap(),
        };

        let logging = observability.logging();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, LogFormat::Pretty);

        let metrics = observability.metrics();
        assert!(metrics.enabled);
        assert_eq!(metrics.listen.port(), 9100);
    }
}
