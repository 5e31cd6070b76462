//! Scheduling priority derived from event categories.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::events::EventType;

/// Ordinal scheduling priority. Lower values are served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Critical = 0,
    High = 10,
    Medium = 20,
    Low = 30,
    #[default]
    Background = 40,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Medium,
        TaskPriority::Low,
        TaskPriority::Background,
    ];

    pub const fn value(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Critical => "CRITICAL",
            TaskPriority::High => "HIGH",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::Low => "LOW",
            TaskPriority::Background => "BACKGROUND",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        TaskPriority::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == upper)
            .ok_or_else(|| format!("unknown priority '{}'", s))
    }
}

/// Minimum priority gap for new work to preempt running work.
pub const PREEMPTION_GAP: u8 = 20;

/// Static mapping from event categories to priorities.
pub struct TaskPriorityAssigner;

impl TaskPriorityAssigner {
    /// Priority for work triggered by `event_type`; absent types run in the background.
    pub fn assign_priority(event_type: Option<EventType>) -> TaskPriority {
        let Some(event_type) = event_type else {
            return TaskPriority::Background;
        };

        match event_type {
            EventType::UserIntervention | EventType::TaskFailed => TaskPriority::Critical,
            EventType::BugReport | EventType::ModuleFailed | EventType::Error => TaskPriority::High,
            EventType::TestRunStarted
            | EventType::TestRunComplete
            | EventType::CorrectionApplied
            | EventType::CodeVersionCreated => TaskPriority::Medium,
            EventType::TaskStarted
            | EventType::RequirementsComplete
            | EventType::PlanningStarted
            | EventType::PlanningComplete
            | EventType::GenerationStarted
            | EventType::CodeGenerated
            | EventType::ModuleStarted
            | EventType::ModuleComplete => TaskPriority::Low,
            EventType::TaskComplete => TaskPriority::Background,
        }
    }

    /// Priority for a raw event tag; unknown tags run in the background.
    pub fn assign_priority_for_tag(tag: &str) -> TaskPriority {
        Self::assign_priority(tag.parse::<EventType>().ok())
    }

    /// True iff `new` outranks `current` by at least [`PREEMPTION_GAP`].
    pub fn should_preempt(new: TaskPriority, current: TaskPriority) -> bool {
        current.value().saturating_sub(new.value()) >= PREEMPTION_GAP
    }
}
