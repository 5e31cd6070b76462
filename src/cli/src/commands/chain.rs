//! Causal chain and concurrency queries.

use anyhow::Result;
use clap::Args;
use chronicle_core::events::{EventFilter, EventOrdering};

use super::{print_events, Context};

#[derive(Args)]
pub struct ChainArgs {
    /// Starting event id (or unique prefix)
    event: String,

    /// List events concurrent with the event instead of its causal successors
    #[arg(short = 'x', long)]
    concurrent: bool,

    /// Restrict the search to the event's own task
    #[arg(long)]
    same_task: bool,
}

pub fn execute(args: ChainArgs, ctx: &Context) -> Result<()> {
    let start = ctx.find_event(&args.event)?;
    let candidates = if args.same_task {
        ctx.store.get_events(&EventFilter::for_task(start.task_id()))
    } else {
        ctx.store.all_events()
    };

    let events = if args.concurrent {
        EventOrdering::find_concurrent_events(&start, &candidates)
    } else {
        EventOrdering::find_causal_chain(&start, &candidates)
    };
    print_events(&events, ctx.format)
}
