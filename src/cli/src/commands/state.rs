//! Projected task state.

use anyhow::{Context as _, Result};
use clap::Args;
use chronicle_core::events::{rebuild_all, rebuild_state, EventFilter, TaskState};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct StateArgs {
    /// Task to project; all tasks when omitted
    task_id: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct StateRow {
    #[tabled(rename = "Task")]
    task_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Module")]
    current_module: String,
    #[tabled(rename = "Iteration")]
    iteration: u32,
    #[tabled(rename = "Version")]
    code_version: u64,
    #[tabled(rename = "Errors")]
    errors: usize,
    #[tabled(rename = "Events")]
    event_count: u64,
}

impl From<&TaskState> for StateRow {
    fn from(state: &TaskState) -> Self {
        Self {
            task_id: state.task_id.clone(),
            status: state.status.to_string(),
            current_module: state.current_module.clone().unwrap_or_else(|| "-".to_string()),
            iteration: state.iteration,
            code_version: state.code_version,
            errors: state.errors.len(),
            event_count: state.event_count,
        }
    }
}

pub fn execute(args: StateArgs, ctx: &Context) -> Result<()> {
    match args.task_id {
        Some(task_id) => {
            let events = ctx.store.get_events(&EventFilter::for_task(task_id.as_str()));
            let state = rebuild_state(&events)
                .with_context(|| format!("Task '{}' has no TASK_STARTED event", task_id))?;
            print_state(&state, ctx.format)
        }
        None => {
            let states = rebuild_all(&ctx.store.all_events());
            match ctx.format {
                OutputFormat::Table => {
                    let rows: Vec<StateRow> = states.values().map(StateRow::from).collect();
                    output::print_list(&rows, ctx.format)
                }
                _ => output::print_item(&states, ctx.format),
            }
        }
    }
}

fn print_state(state: &TaskState, format: OutputFormat) -> Result<()> {
    if format != OutputFormat::Table {
        return output::print_item(state, format);
    }

    output::print_header(&format!("Task {}", state.task_id));
    output::print_detail("Status", &state.status.to_string());
    output::print_detail("Current module", state.current_module.as_deref().unwrap_or("-"));
    output::print_detail("Iteration", &state.iteration.to_string());
    output::print_detail("Code version", &state.code_version.to_string());
    output::print_detail("Events applied", &state.event_count.to_string());
    output::print_detail("Last sequence", &state.last_sequence.to_string());
    for (key, value) in &state.metadata {
        output::print_detail(key, &value.to_string());
    }

    if !state.modules.is_empty() {
        output::print_header("Modules");
        for (name, module) in &state.modules {
            output::print_detail(
                name,
                &format!(
                    "{:?} (generations {}, test runs {}, corrections {}, failures {})",
                    module.status, module.generations, module.test_runs, module.corrections, module.failures
                ),
            );
        }
    }

    if !state.errors.is_empty() {
        output::print_header("Errors");
        for entry in &state.errors {
            output::print_detail(&format!("#{}", entry.sequence_number), &entry.message);
        }
    }
    Ok(())
}
