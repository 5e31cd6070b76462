//! Queue fill monitoring with debounced alerts.
//!
//! The monitor turns a `queued / capacity` ratio into WARNING, CRITICAL and
//! CLEARED alerts. Repeats of the same level inside the debounce window are
//! suppressed, except CRITICAL which is always emitted.

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Severity of a backpressure alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Warning,
    Critical,
    Cleared,
}

impl AlertLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
            AlertLevel::Cleared => "CLEARED",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emitted alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackpressureAlert {
    pub level: AlertLevel,
    pub fill_ratio: f64,
    pub queued: usize,
    pub capacity: usize,
}

/// Thresholds and debounce window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    /// Fill ratio at which WARNING fires
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    /// Fill ratio at which CRITICAL fires
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    /// Window in which same-level repeats are suppressed
    #[serde(default = "default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

fn default_warning_threshold() -> f64 {
    0.8
}

fn default_critical_threshold() -> f64 {
    1.0
}

fn default_debounce() -> Duration {
    Duration::from_secs(5)
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            debounce: default_debounce(),
        }
    }
}

impl BackpressureConfig {
    /// Thresholds must be positive and ordered.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(self.warning_threshold > 0.0 && self.warning_threshold <= self.critical_threshold) {
            return Err(crate::error::ChronicleError::invalid_config(format!(
                "backpressure thresholds out of order (warning {}, critical {})",
                self.warning_threshold, self.critical_threshold
            )));
        }
        Ok(())
    }
}

/// Alert callback: `(level, fill_ratio)`.
pub type AlertCallback = Arc<dyn Fn(AlertLevel, f64) + Send + Sync>;

#[derive(Debug, Default)]
struct AlertMemory {
    active: Option<AlertLevel>,
    last_emitted_at: Option<Instant>,
}

/// Debounced fill-ratio monitor.
pub struct BackpressureMonitor {
    config: BackpressureConfig,
    memory: Mutex<AlertMemory>,
    callbacks: RwLock<Vec<AlertCallback>>,
}

impl BackpressureMonitor {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(AlertMemory::default()),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    /// Register a callback invoked for every emitted alert.
    pub fn on_alert<F>(&self, callback: F)
    where
        F: Fn(AlertLevel, f64) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Probe the current fill level. Returns the alert if one was emitted.
    ///
    /// A zero capacity is a no-op.
    pub fn check(&self, queued: usize, capacity: usize) -> Option<BackpressureAlert> {
        if capacity == 0 {
            return None;
        }
        let fill_ratio = queued as f64 / capacity as f64;
        let level = self.decide(fill_ratio, Instant::now())?;

        let alert = BackpressureAlert {
            level,
            fill_ratio,
            queued,
            capacity,
        };
        self.emit(&alert);
        Some(alert)
    }

    /// Forget the active alert and debounce state.
    pub fn reset(&self) {
        *self.memory.lock() = AlertMemory::default();
    }

    /// Level currently considered active, if any.
    pub fn active_level(&self) -> Option<AlertLevel> {
        self.memory.lock().active
    }

    fn decide(&self, fill_ratio: f64, now: Instant) -> Option<AlertLevel> {
        let mut memory = self.memory.lock();

        let observed = if fill_ratio >= self.config.critical_threshold {
            Some(AlertLevel::Critical)
        } else if fill_ratio >= self.config.warning_threshold {
            Some(AlertLevel::Warning)
        } else {
            None
        };

        let level = match observed {
            Some(AlertLevel::Critical) => AlertLevel::Critical,
            Some(level) => {
                let within_debounce = memory
                    .last_emitted_at
                    .is_some_and(|at| now.duration_since(at) < self.config.debounce);
                if memory.active == Some(level) && within_debounce {
                    return None;
                }
                level
            }
            None if memory.active.is_some() => AlertLevel::Cleared,
            None => return None,
        };

        memory.active = match level {
            AlertLevel::Cleared => None,
            other => Some(other),
        };
        memory.last_emitted_at = Some(now);
        Some(level)
    }

    fn emit(&self, alert: &BackpressureAlert) {
        counter!("chronicle_backpressure_alerts_total", "level" => alert.level.as_str()).increment(1);

        match alert.level {
            AlertLevel::Critical => tracing::error!(
                fill_ratio = alert.fill_ratio,
                queued = alert.queued,
                capacity = alert.capacity,
                "Queue at critical capacity"
            ),
            AlertLevel::Warning => tracing::warn!(
                fill_ratio = alert.fill_ratio,
                queued = alert.queued,
                capacity = alert.capacity,
                "Queue nearing capacity"
            ),
            AlertLevel::Cleared => tracing::info!(
                fill_ratio = alert.fill_ratio,
                "Queue pressure cleared"
            ),
        }

        let callbacks: Vec<AlertCallback> = self.callbacks.read().clone();
        for callback in callbacks {
            callback(alert.level, alert.fill_ratio);
        }
    }
}

impl Default for BackpressureMonitor {
    fn default() -> Self {
        Self::new(BackpressureConfig::default())
    }
}

impl std::fmt::Debug for BackpressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureMonitor")
            .field("config", &self.config)
            .field("memory", &*self.memory.lock())
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> BackpressureMonitor {
        BackpressureMonitor::new(BackpressureConfig {
            debounce: Duration::from_secs(60),
            ..Default::default()
        })
    }

    #[test]
    fn test_below_warning_is_silent() {
        let m = monitor();
        assert!(m.check(7, 10).is_none());
        assert!(m.active_level().is_none());
    }

    #[test]
    fn test_warning_emitted_once_within_debounce() {
        let m = monitor();
        let alert = m.check(8, 10).unwrap();
        assert_eq!(alert.level, AlertLevel::Warning);
        assert!((alert.fill_ratio - 0.8).abs() < f64::EPSILON);

        assert!(m.check(8, 10).is_none());
        assert!(m.check(9, 10).is_none());
    }

    #[test]
    fn test_warning_repeats_after_debounce() {
        let m = BackpressureMonitor::new(BackpressureConfig {
            debounce: Duration::ZERO,
            ..Default::default()
        });
        assert!(m.check(8, 10).is_some());
        assert!(m.check(8, 10).is_some());
    }

    #[test]
    fn test_critical_never_debounced() {
        let m = monitor();
        assert_eq!(m.check(10, 10).unwrap().level, AlertLevel::Critical);
        assert_eq!(m.check(10, 10).unwrap().level, AlertLevel::Critical);
    }

    #[test]
    fn test_level_change_is_immediate() {
        let m = monitor();
        assert_eq!(m.check(8, 10).unwrap().level, AlertLevel::Warning);
        assert_eq!(m.check(10, 10).unwrap().level, AlertLevel::Critical);
        assert_eq!(m.check(8, 10).unwrap().level, AlertLevel::Warning);
        assert_eq!(m.check(2, 10).unwrap().level, AlertLevel::Cleared);
        assert!(m.check(2, 10).is_none());
    }

    #[test]
    fn test_zero_capacity_is_noop() {
        let m = monitor();
        assert!(m.check(5, 0).is_none());
    }

    #[test]
    fn test_reset_forgets_active_alert() {
        let m = monitor();
        m.check(8, 10);
        m.reset();
        assert!(m.check(1, 10).is_none());
        assert_eq!(m.check(8, 10).unwrap().level, AlertLevel::Warning);
    }

    #[test]
    fn test_callback_receives_alerts() {
        let m = monitor();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        m.on_alert(move |level, ratio| sink.lock().push((level, ratio)));

        m.check(8, 10);
        m.check(10, 10);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, AlertLevel::Warning);
        assert_eq!(seen[1], (AlertLevel::Critical, 1.0));
    }
}
