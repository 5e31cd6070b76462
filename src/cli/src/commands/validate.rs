//! Staleness check of a report against the current code event.

use anyhow::{Context as _, Result};
use clap::Args;
use chronicle_core::events::{EventOrdering, ReportValidity};
use chronicle_core::runtime::CODE_EVENT_TYPES;
use colored::*;
use serde::Serialize;

use super::Context;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ValidateArgs {
    /// Report event id (or unique prefix)
    report: String,

    /// Code event to check against; defaults to the task's latest code event
    #[arg(short, long)]
    against: Option<String>,
}

#[derive(Debug, Serialize)]
struct ValidationResult {
    report_id: String,
    code_event_id: String,
    code_version: u64,
    #[serde(flatten)]
    validity: ReportValidity,
}

pub fn execute(args: ValidateArgs, ctx: &Context) -> Result<()> {
    let report = ctx.find_event(&args.report)?;
    let code = match args.against {
        Some(id) => ctx.find_event(&id)?,
        None => ctx
            .store
            .latest_of_type(report.task_id(), &CODE_EVENT_TYPES)
            .with_context(|| format!("Task '{}' has no code event", report.task_id()))?,
    };

    let validity = EventOrdering::is_report_valid_for_current_code(&report, &code);
    let result = ValidationResult {
        report_id: report.event_id().to_string(),
        code_event_id: code.event_id().to_string(),
        code_version: code.code_version(),
        validity,
    };

    if ctx.format != OutputFormat::Table {
        return output::print_item(&result, ctx.format);
    }

    output::print_detail("Report", &format!("{} ({})", result.report_id, report.event_type()));
    output::print_detail("Code event", &format!("{} (v{})", result.code_event_id, result.code_version));
    match validity {
        ReportValidity::Valid => output::print_detail("Result", &"actionable".green().to_string()),
        ReportValidity::Stale(reason) => {
            output::print_detail("Result", &format!("{} ({})", "stale".red(), reason))
        }
    }
    Ok(())
}
