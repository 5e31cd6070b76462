//! Process-level wiring of the event log and the orchestrator.
//!
//! [`Chronicle`] owns one [`EventStore`] and one [`TaskOrchestrator`] built
//! from a [`Config`]. Work triggered by an event is scheduled at the priority
//! its type maps to; feedback is first checked against the task's current
//! code event and refused when stale.

use metrics::counter;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::Config;
use crate::error::{ChronicleError, Result};
use crate::events::{Event, EventOrdering, EventStore, EventType, ReportValidity, StalenessReason};
use crate::orchestrator::{BackpressureMonitor, TaskHandle, TaskOrchestrator, TaskPriorityAssigner};

/// Event types that mark a new version of the code under test.
pub const CODE_EVENT_TYPES: [EventType; 2] = [EventType::CodeVersionCreated, EventType::CodeGenerated];

/// Result of [`Chronicle::schedule_feedback`].
#[derive(Debug)]
pub enum Dispatch {
    /// The report was current and its work is queued.
    Scheduled(TaskHandle),
    /// The report no longer applies to the current code.
    Stale(StalenessReason),
}

impl Dispatch {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Dispatch::Scheduled(_))
    }
}

/// Running event log plus orchestrator.
pub struct Chronicle {
    config: Config,
    store: Arc<EventStore>,
    orchestrator: TaskOrchestrator,
}

impl Chronicle {
    /// Validate `config`, load the persisted log and start the workers.
    ///
    /// Telemetry is process-global and left to the caller; install it first
    /// with [`crate::telemetry::init_telemetry`] using `config.logging` and
    /// `config.metrics`.
    #[instrument(skip(config), fields(path = %config.store.path.display()))]
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(EventStore::with_path(&config.store.path));
        let report = store.load().await?;

        let monitor = BackpressureMonitor::new(config.backpressure.clone());
        let orchestrator = TaskOrchestrator::with_monitor(config.orchestrator.clone(), monitor)?;
        orchestrator.start()?;

        tracing::info!(
            loaded = report.loaded,
            skipped = report.skipped,
            "Chronicle opened"
        );

        Ok(Self {
            config,
            store,
            orchestrator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    /// Schedule work triggered by `event` at the priority of its type.
    pub async fn schedule<F, Fut>(&self, event: &Event, work: F) -> Result<TaskHandle>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let priority = TaskPriorityAssigner::assign_priority(Some(event.event_type()));
        self.orchestrator
            .submit(event.event_id().to_string(), work, priority, None)
            .await
    }

    /// Schedule work for a feedback report if it still applies to the
    /// latest code event of its task.
    ///
    /// Fails with `EventNotFound` when the task has no code event yet.
    #[instrument(skip(self, report, work), fields(task_id = %report.task_id()))]
    pub async fn schedule_feedback<F, Fut>(&self, report: &Event, work: F) -> Result<Dispatch>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let current = self
            .store
            .latest_of_type(report.task_id(), &CODE_EVENT_TYPES)
            .ok_or_else(|| ChronicleError::not_found("code event for task", report.task_id()))?;

        match EventOrdering::is_report_valid_for_current_code(report, &current) {
            ReportValidity::Valid => Ok(Dispatch::Scheduled(self.schedule(report, work).await?)),
            ReportValidity::Stale(reason) => {
                counter!("chronicle_stale_reports_total", "reason" => reason.as_str()).increment(1);
                tracing::info!(
                    report_id = %report.event_id(),
                    code_event_id = %current.event_id(),
                    reason = %reason,
                    "Refusing stale feedback"
                );
                Ok(Dispatch::Stale(reason))
            }
        }
    }

    /// Shut the orchestrator down, then persist the log if configured to.
    pub async fn shutdown(&self) -> Result<()> {
        self.orchestrator.shutdown().await;
        if self.config.store.save_on_shutdown {
            self.store.save().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Chronicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronicle")
            .field("store", &self.store)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventData, EventFactory};
    use crate::orchestrator::{TaskOutcome, TaskPriority};

    fn config_in(dir: &std::path::Path, save_on_shutdown: bool) -> Config {
        let mut config = Config::default();
        config.store.path = dir.join("events.json");
        config.store.save_on_shutdown = save_on_shutdown;
        config.orchestrator.worker_count = 1;
        config.orchestrator.max_concurrent = 1;
        config
    }

    #[tokio::test]
    async fn test_feedback_scheduled_or_refused() {
        let dir = tempfile::tempdir().unwrap();
        let chronicle = Chronicle::open(config_in(dir.path(), false)).await.unwrap();
        let mut generator = EventFactory::new("generator").unwrap();
        let mut tester = EventFactory::new("tester").unwrap();

        let code_v1 = chronicle
            .store()
            .append(generator.create("t1", EventType::CodeVersionCreated, EventData::new(), 1).unwrap())
            .unwrap();
        let report = chronicle
            .store()
            .append(tester.create_caused_by(&code_v1, EventType::BugReport, EventData::new(), 1).unwrap())
            .unwrap();

        match chronicle.schedule_feedback(&report, |_| async { Ok(()) }).await.unwrap() {
            Dispatch::Scheduled(handle) => {
                assert_eq!(handle.priority(), TaskPriority::High);
                assert_eq!(handle.outcome().await, TaskOutcome::Completed);
            }
            other => panic!("expected scheduled, got {:?}", other),
        }

        chronicle
            .store()
            .append(generator.create_caused_by(&report, EventType::CodeVersionCreated, EventData::new(), 2).unwrap())
            .unwrap();
        let dispatch = chronicle.schedule_feedback(&report, |_| async { Ok(()) }).await.unwrap();
        assert!(matches!(dispatch, Dispatch::Stale(StalenessReason::StaleVersion { .. })));

        chronicle.shutdown().await.unwrap();
        assert!(!dir.path().join("events.json").exists());
    }

    #[tokio::test]
    async fn test_feedback_without_code_event_fails() {
        let dir = tempfile::tempdir().unwrap();
        let chronicle = Chronicle::open(config_in(dir.path(), false)).await.unwrap();
        let report = chronicle
            .store()
            .append(Event::builder("t1", EventType::BugReport).build().unwrap())
            .unwrap();

        let err = chronicle
            .schedule_feedback(&report, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::EventNotFound);
        chronicle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_saves_and_reopen_restores() {
        let dir = tempfile::tempdir().unwrap();
        let chronicle = Chronicle::open(config_in(dir.path(), true)).await.unwrap();
        let started = chronicle
            .store()
            .append(Event::builder("t1", EventType::TaskStarted).build().unwrap())
            .unwrap();
        chronicle.shutdown().await.unwrap();

        let reopened = Chronicle::open(config_in(dir.path(), true)).await.unwrap();
        assert_eq!(reopened.store().all_events(), vec![started]);
        reopened.shutdown().await.unwrap();
    }
}
