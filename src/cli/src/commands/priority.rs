//! Priority lookup for event tags.

use anyhow::Result;
use clap::Args;
use chronicle_core::orchestrator::{TaskPriority, TaskPriorityAssigner};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct PriorityArgs {
    /// Event type tags; every known type when omitted
    tags: Vec<String>,

    /// Also report whether each tag would preempt work at this priority
    #[arg(short = 'p', long)]
    current: Option<TaskPriority>,
}

#[derive(Debug, Serialize, Tabled)]
struct PriorityRow {
    #[tabled(rename = "Event type")]
    tag: String,
    #[tabled(rename = "Priority")]
    priority: TaskPriority,
    #[tabled(rename = "Value")]
    value: u8,
    #[tabled(rename = "Preempts", display_with = "display_preempts")]
    preempts: Option<bool>,
}

fn display_preempts(preempts: &Option<bool>) -> String {
    match preempts {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => "-".to_string(),
    }
}

pub fn execute(args: PriorityArgs, format: OutputFormat) -> Result<()> {
    let tags: Vec<String> = if args.tags.is_empty() {
        chronicle_core::events::EventType::ALL
            .iter()
            .map(|t| t.as_str().to_string())
            .collect()
    } else {
        args.tags
    };

    let rows: Vec<PriorityRow> = tags
        .into_iter()
        .map(|tag| {
            let priority = TaskPriorityAssigner::assign_priority_for_tag(&tag);
            PriorityRow {
                tag,
                priority,
                value: priority.value(),
                preempts: args
                    .current
                    .map(|current| TaskPriorityAssigner::should_preempt(priority, current)),
            }
        })
        .collect();

    output::print_list(&rows, format)
}
