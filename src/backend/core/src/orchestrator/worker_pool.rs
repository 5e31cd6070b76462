//! Worker Pool - Concurrency permits backed by a tokio Semaphore.
//!
//! The `WorkerPool` provides:
//! - A fixed number of execution permits (`max_concurrent`)
//! - RAII permits that release on drop
//! - Pool statistics (active, peak, wait and execution time)

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ChronicleError, Result};

/// A held execution permit. Released when dropped.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    pool_stats: Arc<PoolStats>,
    acquired_at: Instant,
}

impl WorkerPermit {
    /// Time since the permit was acquired.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.pool_stats.record_release(self.acquired_at.elapsed());
    }
}

/// Internal statistics tracking.
struct PoolStats {
    /// Permits handed out
    acquired: AtomicU64,
    /// Total time waiting for permits (microseconds)
    total_wait_time_us: AtomicU64,
    /// Total time permits were held (microseconds)
    total_exec_time_us: AtomicU64,
    /// Peak concurrent holders
    peak_concurrent: AtomicUsize,
    /// Current concurrent holders
    current_concurrent: AtomicUsize,
}

impl PoolStats {
    fn new() -> Self {
        Self {
            acquired: AtomicU64::new(0),
            total_wait_time_us: AtomicU64::new(0),
            total_exec_time_us: AtomicU64::new(0),
            peak_concurrent: AtomicUsize::new(0),
            current_concurrent: AtomicUsize::new(0),
        }
    }

    fn record_acquire(&self, wait_time: Duration) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_us
            .fetch_add(wait_time.as_micros() as u64, Ordering::Relaxed);
        let current = self.current_concurrent.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_concurrent.fetch_max(current, Ordering::Relaxed);
    }

    fn record_release(&self, held: Duration) {
        self.total_exec_time_us
            .fetch_add(held.as_micros() as u64, Ordering::Relaxed);
        self.current_concurrent.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Limits how many units of work execute at once.
pub struct WorkerPool {
    name: String,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        let name = name.into();
        tracing::info!(pool_name = %name, max_concurrent, "Worker pool created");

        Self {
            name,
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            stats: Arc::new(PoolStats::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of permits currently held.
    pub fn active(&self) -> usize {
        self.stats.current_concurrent.load(Ordering::Relaxed)
    }

    pub fn is_at_capacity(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Acquire a permit, suspending until one is free.
    ///
    /// Fails once the pool has been closed.
    pub async fn acquire(&self) -> Result<WorkerPermit> {
        let start = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChronicleError::shut_down("acquire worker permit"))?;

        let wait_time = start.elapsed();
        self.stats.record_acquire(wait_time);

        tracing::trace!(
            pool_name = %self.name,
            wait_time_ms = wait_time.as_millis() as u64,
            available = self.semaphore.available_permits(),
            "Worker permit acquired"
        );

        Ok(WorkerPermit {
            _permit: permit,
            pool_stats: Arc::clone(&self.stats),
            acquired_at: Instant::now(),
        })
    }

    /// Try to acquire a permit without waiting.
    pub fn try_acquire(&self) -> Option<WorkerPermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.stats.record_acquire(Duration::ZERO);
        Some(WorkerPermit {
            _permit: permit,
            pool_stats: Arc::clone(&self.stats),
            acquired_at: Instant::now(),
        })
    }

    /// Stop handing out permits. Waiters fail; held permits stay valid.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> WorkerPoolStats {
        let stats = &self.stats;
        let acquired = stats.acquired.load(Ordering::Relaxed);
        let avg = |total: &AtomicU64| {
            if acquired > 0 {
                total.load(Ordering::Relaxed) / acquired
            } else {
                0
            }
        };

        WorkerPoolStats {
            name: self.name.clone(),
            max_concurrent: self.max_concurrent,
            available_permits: self.semaphore.available_permits(),
            active: self.active(),
            peak_concurrent: stats.peak_concurrent.load(Ordering::Relaxed),
            acquired,
            avg_wait_time_us: avg(&stats.total_wait_time_us),
            avg_exec_time_us: avg(&stats.total_exec_time_us),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("max_concurrent", &self.max_concurrent)
            .field("available", &self.available_permits())
            .finish()
    }
}

/// Statistics for the worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolStats {
    pub name: String,
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub active: usize,
    pub peak_concurrent: usize,
    /// Total permits handed out
    pub acquired: u64,
    pub avg_wait_time_us: u64,
    pub avg_exec_time_us: u64,
}
