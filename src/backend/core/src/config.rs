//! Configuration management.
//!
//! Sources, lowest precedence first: built-in defaults, an optional config
//! file, then `CHRONICLE__*` environment variables (`__` separates nesting,
//! e.g. `CHRONICLE__ORCHESTRATOR__MAX_QUEUED=50`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ChronicleError, Result};
use crate::orchestrator::{BackpressureConfig, OrchestratorConfig};
use crate::telemetry::{LoggingConfig, MetricsConfig};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CHRONICLE";

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Event store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Orchestrator configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Backpressure thresholds
    #[serde(default)]
    pub backpressure: BackpressureConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the persisted event log
    #[serde(default = "default_log_path")]
    pub path: PathBuf,

    /// Save the log when the process shuts down cleanly
    #[serde(default = "default_save_on_shutdown")]
    pub save_on_shutdown: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            save_on_shutdown: default_save_on_shutdown(),
        }
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("chronicle-events.json")
}

fn default_save_on_shutdown() -> bool {
    true
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        Self::build(None)
    }

    /// Load from a specific file, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject nonsensical values.
    pub fn validate(&self) -> Result<()> {
        if self.store.path.as_os_str().is_empty() {
            return Err(ChronicleError::invalid_config("store.path must not be empty"));
        }
        self.orchestrator.validate()?;
        self.backpressure.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.path, PathBuf::from("chronicle-events.json"));
        assert_eq!(config.orchestrator.max_queued, 100);
        assert!((config.backpressure.warning_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_file_with_durations() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
path = "/tmp/chronicle/log.json"

[orchestrator]
max_queued = 10
max_concurrent = 2
worker_count = 3
poll_interval = "25ms"
default_timeout = "30s"

[backpressure]
warning_threshold = 0.5
debounce = "2s"

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/chronicle/log.json"));
        assert_eq!(config.orchestrator.max_queued, 10);
        assert_eq!(config.orchestrator.worker_count, 3);
        assert_eq!(config.orchestrator.poll_interval, Duration::from_millis(25));
        assert_eq!(config.orchestrator.default_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.backpressure.debounce, Duration::from_secs(2));
        assert!((config.backpressure.critical_threshold - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.logging.format, crate::telemetry::LogFormat::Json);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.orchestrator.worker_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backpressure.warning_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
