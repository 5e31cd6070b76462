//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter` and json/pretty/compact output
//! - **Metrics**: `metrics` facade with an optional Prometheus recorder
//!
//! # Example
//!
//! ```rust,no_run
//! use chronicle_core::config::Config;
//! use chronicle_core::telemetry::init_telemetry;
//!
//! let config = Config::load().expect("config");
//! let _metrics = init_telemetry(&config.logging, &config.metrics).expect("telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, MetricsConfig, MetricsHandle};

/// Initialize logging and metrics. Call once at startup.
///
/// # Errors
///
/// Returns an error if either component fails to initialize.
pub fn init_telemetry(logging: &LoggingConfig, metrics: &MetricsConfig) -> anyhow::Result<MetricsHandle> {
    init_logging(logging)?;
    let handle = init_metrics(metrics)?;
    ::tracing::debug!(metrics_enabled = handle.is_enabled(), "Telemetry initialized");
    Ok(handle)
}
