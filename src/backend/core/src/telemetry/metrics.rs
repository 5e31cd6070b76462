//! Prometheus metrics for the event log and orchestrator.
//!
//! All instrumentation goes through the `metrics` facade; without an
//! installed recorder it is a no-op. [`init_metrics`] installs a Prometheus
//! recorder and returns a handle that renders the text exposition format.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder
    #[serde(default)]
    pub enabled: bool,

    /// Histogram buckets for task durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels added to all metrics
    #[serde(default)]
    pub global_labels: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_buckets: default_duration_buckets(),
            global_labels: BTreeMap::new(),
        }
    }
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
}

/// Handle to the installed recorder, if any.
pub struct MetricsHandle {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandle")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsHandle {
    /// Handle for a disabled metrics subsystem.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format (empty when disabled).
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsHandle> {
    if !config.enabled {
        return Ok(MetricsHandle::disabled());
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(
        global_labels = config.global_labels.len(),
        "Metrics initialized"
    );

    Ok(MetricsHandle {
        prometheus_handle: Some(handle),
    })
}

/// Register all metric descriptions.
fn register_metric_descriptions() {
    // Event log
    describe_counter!(
        "chronicle_events_appended_total",
        "Events appended to the log, by event type"
    );
    describe_counter!(
        "chronicle_load_skipped_total",
        "Persisted records skipped during load"
    );

    // Orchestrator
    describe_counter!(
        "chronicle_tasks_submitted_total",
        "Units of work submitted, by priority"
    );
    describe_counter!(
        "chronicle_tasks_finished_total",
        "Units of work finished, by outcome"
    );
    describe_gauge!("chronicle_queue_depth", "Units of work waiting in the queue");
    describe_gauge!("chronicle_active_tasks", "Units of work currently executing");
    describe_histogram!(
        "chronicle_task_duration_seconds",
        Unit::Seconds,
        "Execution time of a unit of work"
    );
    describe_histogram!(
        "chronicle_task_queue_wait_seconds",
        Unit::Seconds,
        "Time a unit of work spent queued"
    );
    describe_counter!(
        "chronicle_backpressure_alerts_total",
        "Backpressure alerts emitted, by level"
    );
    describe_counter!(
        "chronicle_stale_reports_total",
        "Feedback refused as stale, by reason"
    );

    // Errors
    describe_counter!(
        "chronicle_errors_total",
        "Errors constructed, by code and category"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let handle = init_metrics(&MetricsConfig::default()).unwrap();
        assert!(!handle.is_enabled());
        assert!(handle.render().is_empty());
    }

    #[test]
    fn test_enabled_recorder_renders_counters() {
        let config = MetricsConfig {
            enabled: true,
            global_labels: BTreeMap::from([("service".to_string(), "chronicle".to_string())]),
            ..Default::default()
        };
        let handle = init_metrics(&config).unwrap();
        assert!(handle.is_enabled());

        metrics::counter!("chronicle_load_skipped_total").increment(2);
        let rendered = handle.render();
        assert!(rendered.contains("chronicle_load_skipped_total"));
        assert!(rendered.contains("service=\"chronicle\""));
    }

    #[test]
    fn test_default_buckets_are_sorted() {
        let buckets = MetricsConfig::default().duration_buckets;
        assert!(buckets.windows(2).all(|w| w[0] < w[1]));
    }
}
