//! Priority task orchestrator.
//!
//! Units of work are submitted with a [`TaskPriority`] (usually derived from
//! the triggering event via [`TaskPriorityAssigner`]) and queued in a bounded
//! [`PriorityQueue`]. A fixed set of worker loops pulls the most urgent item,
//! takes a permit from the [`WorkerPool`] and runs it under an optional
//! deadline. Errors, panics and timeouts are contained at the worker
//! boundary and reported through the item's [`TaskHandle`].
//!
//! ```text
//!  submit ──► PriorityQueue (max_queued) ──► worker loops (worker_count)
//!                    │                              │
//!            BackpressureMonitor            WorkerPool (max_concurrent)
//! ```

pub mod backpressure;
pub mod priority;
pub mod queue;
pub mod worker_pool;

pub use backpressure::*;
pub use priority::*;
pub use queue::*;
pub use worker_pool::*;

use futures::future::BoxFuture;
use futures::FutureExt;
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::{ChronicleError, ErrorCode, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Orchestrator sizing and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Queue capacity; `submit` suspends beyond this
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
    /// Units of work allowed to execute at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Number of worker loops
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// How long a worker waits on an empty queue before re-probing
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Deadline applied when `submit` gets none
    #[serde(default, with = "humantime_serde")]
    pub default_timeout: Option<Duration>,
}

fn default_max_queued() -> usize {
    100
}

fn default_max_concurrent() -> usize {
    4
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_queued: default_max_queued(),
            max_concurrent: default_max_concurrent(),
            worker_count: default_worker_count(),
            poll_interval: default_poll_interval(),
            default_timeout: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_queued == 0 {
            return Err(ChronicleError::invalid_config("orchestrator.max_queued must be greater than zero"));
        }
        if self.max_concurrent == 0 {
            return Err(ChronicleError::invalid_config(
                "orchestrator.max_concurrent must be greater than zero",
            ));
        }
        if self.worker_count == 0 {
            return Err(ChronicleError::invalid_config("orchestrator.worker_count must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(ChronicleError::invalid_config("orchestrator.poll_interval must be non-zero"));
        }
        Ok(())
    }
}

// =============================================================================
// Task Handle
// =============================================================================

/// Final state of a submitted unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl TaskOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::TimedOut => "timed_out",
            TaskOutcome::Cancelled => "cancelled",
        }
    }
}

/// Caller-side handle to a submitted unit of work.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    priority: TaskPriority,
    sequence: u64,
    token: CancellationToken,
    outcome: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Submission sequence number (FIFO tiebreak within a priority).
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Request cancellation. Queued work is dropped without running; running
    /// work sees its token cancelled and is aborted.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the final outcome.
    pub async fn outcome(self) -> TaskOutcome {
        self.outcome.await.unwrap_or(TaskOutcome::Cancelled)
    }
}

type Work = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A queued unit of work.
struct PrioritizedTask {
    id: String,
    priority: TaskPriority,
    work: Work,
    timeout: Option<Duration>,
    token: CancellationToken,
    reply: oneshot::Sender<TaskOutcome>,
    submitted_at: Instant,
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time queue and lifetime counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub active: usize,
    pub capacity: usize,
    pub max_concurrent: usize,
    pub worker_count: usize,
    pub peak_active: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub running: bool,
    pub shut_down: bool,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.completed,
            TaskOutcome::Failed(_) => &self.failed,
            TaskOutcome::TimedOut => &self.timed_out,
            TaskOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

struct Inner {
    config: OrchestratorConfig,
    queue: PriorityQueue<PrioritizedTask>,
    pool: WorkerPool,
    monitor: BackpressureMonitor,
    shutdown: CancellationToken,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Bounded, concurrency-limited priority scheduler.
///
/// Cheap to clone; clones share the same queue and workers.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl TaskOrchestrator {
    /// Create an orchestrator with a default backpressure monitor.
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        Self::with_monitor(config, BackpressureMonitor::default())
    }

    /// Create an orchestrator that reports fill pressure through `monitor`.
    pub fn with_monitor(config: OrchestratorConfig, monitor: BackpressureMonitor) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            max_queued = config.max_queued,
            max_concurrent = config.max_concurrent,
            worker_count = config.worker_count,
            "Task orchestrator created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                queue: PriorityQueue::new(config.max_queued),
                pool: WorkerPool::new("orchestrator", config.max_concurrent),
                monitor,
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
                counters: Counters::default(),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                config,
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Register a backpressure callback `(level, fill_ratio)`.
    pub fn on_backpressure<F>(&self, callback: F)
    where
        F: Fn(AlertLevel, f64) + Send + Sync + 'static,
    {
        self.inner.monitor.on_alert(callback);
    }

    /// Spawn the worker loops. Work submitted earlier is dispatched in
    /// priority order from here on.
    pub fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ChronicleError::shut_down("start"));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ChronicleError::new(
                ErrorCode::OrchestratorAlreadyStarted,
                "orchestrator is already running",
            ));
        }

        let mut workers = self.inner.workers.lock();
        for worker_index in 0..self.inner.config.worker_count {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(inner.worker_loop(worker_index)));
        }

        tracing::info!(worker_count = self.inner.config.worker_count, "Task orchestrator started");
        Ok(())
    }

    /// Enqueue a unit of work, suspending while the queue is full.
    ///
    /// `work` receives a cancellation token that fires on timeout, handle
    /// cancellation or shutdown. `timeout` falls back to the configured
    /// default.
    #[instrument(skip(self, id, work), fields(task_id = tracing::field::Empty))]
    pub async fn submit<F, Fut>(
        &self,
        id: impl Into<String>,
        work: F,
        priority: TaskPriority,
        timeout: Option<Duration>,
    ) -> Result<TaskHandle>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = id.into();
        tracing::Span::current().record("task_id", id.as_str());

        if self.inner.shutdown.is_cancelled() {
            return Err(ChronicleError::shut_down("submit"));
        }

        let token = self.inner.shutdown.child_token();
        let (reply, outcome) = oneshot::channel();
        let task = PrioritizedTask {
            id: id.clone(),
            priority,
            work: Box::new(move |token| work(token).boxed()),
            timeout: timeout.or(self.inner.config.default_timeout),
            token: token.clone(),
            reply,
            submitted_at: Instant::now(),
        };

        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let sequence = match self.inner.queue.push(priority, task).await {
            Ok(sequence) => sequence,
            Err(QueueClosed(_)) => {
                self.inner.release_in_flight();
                return Err(ChronicleError::shut_down("submit"));
            }
        };

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        counter!("chronicle_tasks_submitted_total", "priority" => priority.as_str()).increment(1);
        self.inner.sample_pressure();

        tracing::debug!(priority = %priority, sequence, "Task submitted");

        Ok(TaskHandle {
            id,
            priority,
            sequence,
            token,
            outcome,
        })
    }

    /// Stop accepting work, cancel everything queued or running, and wait
    /// for every worker loop to exit. Idempotent.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();

        let drained = inner.queue.close();
        let drained_count = drained.len();
        for task in drained {
            inner.finish(task, TaskOutcome::Cancelled, None);
        }
        inner.pool.close();

        let workers: Vec<_> = inner.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker loop terminated abnormally");
            }
        }

        gauge!("chronicle_queue_depth").set(0.0);
        tracing::info!(drained = drained_count, "Task orchestrator shut down");
    }

    /// Wait until every submitted unit of work has reached an outcome.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Non-blocking snapshot of queue state and lifetime counters.
    pub fn get_queue_stats(&self) -> QueueStats {
        let inner = &self.inner;
        let pool = inner.pool.stats();
        let counters = &inner.counters;

        QueueStats {
            queued: inner.queue.len(),
            active: pool.active,
            capacity: inner.queue.capacity(),
            max_concurrent: pool.max_concurrent,
            worker_count: inner.config.worker_count,
            peak_active: pool.peak_concurrent,
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            timed_out: counters.timed_out.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
            running: inner.started.load(Ordering::SeqCst) && !inner.shutdown.is_cancelled(),
            shut_down: inner.shutdown.is_cancelled(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("config", &self.inner.config)
            .field("queue", &self.inner.queue)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Inner {
    async fn worker_loop(self: Arc<Self>, worker_index: usize) {
        tracing::debug!(worker_index, "Worker started");

        loop {
            let task = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                popped = tokio::time::timeout(self.config.poll_interval, self.queue.pop()) => match popped {
                    Err(_) => {
                        self.sample_pressure();
                        continue;
                    }
                    Ok(None) => break,
                    Ok(Some(task)) => task,
                },
            };
            self.sample_pressure();

            if task.token.is_cancelled() {
                self.finish(task, TaskOutcome::Cancelled, None);
                continue;
            }

            let token = task.token.clone();
            let permit = tokio::select! {
                _ = token.cancelled() => {
                    self.finish(task, TaskOutcome::Cancelled, None);
                    continue;
                }
                permit = self.pool.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.finish(task, TaskOutcome::Cancelled, None);
                        break;
                    }
                },
            };
            gauge!("chronicle_active_tasks").set(self.pool.active() as f64);

            let started = Instant::now();
            let PrioritizedTask {
                id,
                priority,
                work,
                timeout,
                token,
                reply,
                submitted_at,
            } = task;
            histogram!("chronicle_task_queue_wait_seconds").record(submitted_at.elapsed().as_secs_f64());

            let outcome = run_work(&id, work, timeout, token).await;
            drop(permit);
            gauge!("chronicle_active_tasks").set(self.pool.active() as f64);

            tracing::debug!(
                worker_index,
                task_id = %id,
                priority = %priority,
                outcome = outcome.metric_label(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Task finished"
            );
            self.complete(reply, outcome, Some(started.elapsed()));
            self.sample_pressure();
        }

        tracing::debug!(worker_index, "Worker stopped");
    }

    fn finish(&self, task: PrioritizedTask, outcome: TaskOutcome, duration: Option<Duration>) {
        tracing::debug!(task_id = %task.id, outcome = outcome.metric_label(), "Task finished without running");
        self.complete(task.reply, outcome, duration);
    }

    fn complete(&self, reply: oneshot::Sender<TaskOutcome>, outcome: TaskOutcome, duration: Option<Duration>) {
        self.counters.record(&outcome);
        counter!("chronicle_tasks_finished_total", "outcome" => outcome.metric_label()).increment(1);
        if let Some(duration) = duration {
            histogram!("chronicle_task_duration_seconds").record(duration.as_secs_f64());
        }
        // The handle may have been dropped.
        let _ = reply.send(outcome);
        self.release_in_flight();
    }

    fn release_in_flight(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn sample_pressure(&self) {
        let queued = self.queue.len();
        gauge!("chronicle_queue_depth").set(queued as f64);
        self.monitor.check(queued, self.queue.capacity());
    }
}

/// Run one unit of work on its own task so panics stay contained, racing it
/// against cancellation and the deadline.
async fn run_work(id: &str, work: Work, timeout: Option<Duration>, token: CancellationToken) -> TaskOutcome {
    let mut handle = tokio::spawn(work(token.clone()));
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => {
                tracing::warn!(task_id = %id, error = %format!("{:#}", e), "Task failed");
                TaskOutcome::Failed(format!("{:#}", e))
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(task_id = %id, panic = %message, "Task panicked");
                TaskOutcome::Failed(format!("panicked: {}", message))
            }
            Err(_) => TaskOutcome::Cancelled,
        },
        _ = token.cancelled() => {
            handle.abort();
            TaskOutcome::Cancelled
        }
        _ = deadline => {
            token.cancel();
            handle.abort();
            tracing::warn!(task_id = %id, timeout_ms = timeout.map(|t| t.as_millis() as u64), "Task timed out");
            TaskOutcome::TimedOut
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
