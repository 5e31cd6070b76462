//! Filtered event listing.

use anyhow::Result;
use clap::Args;
use chronicle_core::events::{EventFilter, EventType};

use super::{print_events, Context};
use crate::output;

#[derive(Args)]
pub struct EventsArgs {
    /// Only events of this task
    #[arg(short, long)]
    task: Option<String>,

    /// Only events of this type (e.g. BUG_REPORT)
    #[arg(short = 'y', long = "type")]
    event_type: Option<EventType>,

    /// Only events with this correlation id
    #[arg(short = 'r', long)]
    correlation: Option<String>,

    /// Show only the last N matching events
    #[arg(short = 'n', long)]
    limit: Option<usize>,
}

pub fn execute(args: EventsArgs, ctx: &Context) -> Result<()> {
    let filter = EventFilter {
        task_id: args.task,
        event_type: args.event_type,
        correlation_id: args.correlation,
    };

    let mut events = ctx.store.get_events(&filter);
    let total = events.len();
    if let Some(limit) = args.limit {
        events = events.split_off(total.saturating_sub(limit));
    }

    print_events(&events, ctx.format)?;
    if ctx.format == output::OutputFormat::Table && events.len() < total {
        output::print_info(&format!("Showing last {} of {} events", events.len(), total));
    }
    Ok(())
}
