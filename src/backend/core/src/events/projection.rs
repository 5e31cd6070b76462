//! Deterministic state projection.
//!
//! Task state is never persisted. It is rebuilt by folding the task's events,
//! sorted by sequence number, into a fresh [`TaskState`]. Given the same event
//! set the result is identical regardless of input order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::event::{Event, EventType};
use super::ordering::EventOrdering;

// =============================================================================
// Aggregate Trait
// =============================================================================

/// State that can be reconstructed from a sequence of events.
///
/// An aggregate starts at its `Default` state and folds each event via
/// `apply`. Implementations must not perform I/O or fail: every stored event
/// is valid by definition.
pub trait Aggregate: Default {
    fn apply(&mut self, event: &Event);

    /// Fold `events` in the given order into a fresh aggregate.
    fn replay<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut aggregate = Self::default();
        for event in events {
            aggregate.apply(event);
        }
        aggregate
    }
}

// =============================================================================
// Task State
// =============================================================================

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Created,
    Planning,
    Generating,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Planning => "PLANNING",
            TaskStatus::Generating => "GENERATING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Status of a single module within a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    #[default]
    InProgress,
    Generated,
    Testing,
    Complete,
    Failed,
}

/// Per-module progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub status: ModuleStatus,
    pub generations: u32,
    pub test_runs: u32,
    pub corrections: u32,
    pub failures: u32,
    pub last_test_passed: Option<bool>,
    pub last_error: Option<String>,
}

/// One entry of the error trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub module: Option<String>,
}

/// Reconstructed state of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,
    pub current_module: Option<String>,
    pub iteration: u32,
    pub code_version: u64,
    pub modules: BTreeMap<String, ModuleProgress>,
    pub errors: Vec<ErrorEntry>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Number of events applied.
    pub event_count: u64,
    pub last_sequence: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskState {
    fn module_mut(&mut self, event: &Event) -> Option<&mut ModuleProgress> {
        let name = event.data_str("module")?;
        Some(self.modules.entry(name.to_string()).or_default())
    }

    fn bump_counter(&mut self, key: &str) {
        let next = self.metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        self.metadata.insert(key.to_string(), next.into());
    }

    /// Count stored in metadata under `key` (0 if absent).
    pub fn counter(&self, key: &str) -> u64 {
        self.metadata.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
    }
}

/// Metadata key counting bug reports.
pub const BUG_REPORTS_KEY: &str = "bug_reports";
/// Metadata key counting user interventions.
pub const USER_INTERVENTIONS_KEY: &str = "user_interventions";

impl Aggregate for TaskState {
    fn apply(&mut self, event: &Event) {
        self.event_count += 1;
        self.last_sequence = event.sequence_number();
        self.updated_at = Some(event.timestamp());

        match event.event_type() {
            EventType::TaskStarted => {
                self.task_id = event.task_id().to_string();
                self.started_at = Some(event.timestamp());
                self.status = TaskStatus::Created;
            }
            EventType::RequirementsComplete | EventType::PlanningStarted => {
                self.status = TaskStatus::Planning;
            }
            EventType::PlanningComplete | EventType::GenerationStarted => {
                self.status = TaskStatus::Generating;
            }
            EventType::TaskComplete => {
                self.status = TaskStatus::Completed;
            }
            EventType::TaskFailed => {
                self.status = TaskStatus::Failed;
                if let Some(reason) = event.data_str("reason").or_else(|| event.data_str("error")) {
                    self.metadata.insert("failure_reason".to_string(), reason.into());
                }
            }
            EventType::Error => {
                let message = event
                    .data_str("message")
                    .or_else(|| event.data_str("error"))
                    .unwrap_or("unspecified error")
                    .to_string();
                self.errors.push(ErrorEntry {
                    sequence_number: event.sequence_number(),
                    timestamp: event.timestamp(),
                    message,
                    module: event.data_str("module").map(str::to_string),
                });
            }
            EventType::ModuleStarted => {
                if let Some(name) = event.data_str("module") {
                    self.current_module = Some(name.to_string());
                }
                if let Some(module) = self.module_mut(event) {
                    module.status = ModuleStatus::InProgress;
                }
            }
            EventType::ModuleComplete => {
                if let Some(module) = self.module_mut(event) {
                    module.status = ModuleStatus::Complete;
                }
                if self.current_module.as_deref() == event.data_str("module") {
                    self.current_module = None;
                }
            }
            EventType::ModuleFailed => {
                let error = event.data_str("error").map(str::to_string);
                if let Some(module) = self.module_mut(event) {
                    module.status = ModuleStatus::Failed;
                    module.failures += 1;
                    module.last_error = error;
                }
            }
            EventType::CodeGenerated => {
                if let Some(module) = self.module_mut(event) {
                    module.status = ModuleStatus::Generated;
                    module.generations += 1;
                }
            }
            EventType::TestRunStarted => {
                if let Some(module) = self.module_mut(event) {
                    module.status = ModuleStatus::Testing;
                }
            }
            EventType::TestRunComplete => {
                let passed = event.data_bool("passed");
                if let Some(module) = self.module_mut(event) {
                    module.test_runs += 1;
                    module.last_test_passed = passed;
                }
            }
            EventType::CorrectionApplied => {
                self.iteration += 1;
                if let Some(module) = self.module_mut(event) {
                    module.corrections += 1;
                }
            }
            EventType::CodeVersionCreated => {
                self.code_version = event.code_version();
            }
            EventType::BugReport => self.bump_counter(BUG_REPORTS_KEY),
            EventType::UserIntervention => self.bump_counter(USER_INTERVENTIONS_KEY),
        }
    }
}

// =============================================================================
// Projection
// =============================================================================

/// Rebuild the state of a single task.
///
/// Returns `None` when no `TASK_STARTED` event is present. If `events` mixes
/// tasks, the task of the earliest `TASK_STARTED` is projected and the rest
/// are ignored.
pub fn rebuild_state(events: &[Event]) -> Option<TaskState> {
    let sorted = EventOrdering::sort_events_causal(events);
    let task_id = sorted
        .iter()
        .find(|e| e.event_type() == EventType::TaskStarted)?
        .task_id()
        .to_string();

    Some(TaskState::replay(sorted.iter().filter(|e| e.task_id() == task_id)))
}

/// Rebuild the state of every task with a `TASK_STARTED` event.
pub fn rebuild_all(events: &[Event]) -> BTreeMap<String, TaskState> {
    let mut by_task: BTreeMap<&str, Vec<Event>> = BTreeMap::new();
    for event in events {
        by_task.entry(event.task_id()).or_default().push(event.clone());
    }

    by_task
        .into_iter()
        .filter_map(|(task_id, events)| rebuild_state(&events).map(|s| (task_id.to_string(), s)))
        .collect()
}
