//! Chronicle CLI - Inspect causal event logs and scheduling policy.
//!
//! Provides commands for listing events, projecting task state, checking
//! report staleness, walking causal chains and looking up priorities.

mod commands;
mod output;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chronicle_core::config::Config;
use chronicle_core::ChronicleError;
use chronicle_core::telemetry::{self, LogFormat};
use commands::{chain, events, priority, state, validate, Context};
use output::OutputFormat;

/// Chronicle - Causal event log and priority task orchestrator CLI
#[derive(Parser)]
#[command(
    name = "chronicle",
    version,
    about = "Chronicle - Causal event log inspection",
    long_about = "CLI tool for inspecting Chronicle event logs: filtered listings, projected task state, staleness checks and causal chains.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Configuration file
    #[arg(short, long, global = true, env = "CHRONICLE_CONFIG")]
    config: Option<PathBuf>,

    /// Event log path (overrides configuration)
    #[arg(short, long, global = true, env = "CHRONICLE_LOG")]
    log: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List events, optionally filtered
    Events(events::EventsArgs),

    /// Show projected task state
    State(state::StateArgs),

    /// Check whether a report still applies to the current code
    Validate(validate::ValidateArgs),

    /// Show an event's causal successors or concurrent events
    Chain(chain::ChainArgs),

    /// Look up scheduling priority for event types
    Priority(priority::PriorityArgs),

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli).await {
        if let Some(err) = e.downcast_ref::<ChronicleError>() {
            err.log();
        }
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(log) = cli.log {
        config.store.path = log;
    }

    // The CLI is quiet unless asked otherwise.
    config.logging.level = if cli.verbose { "debug" } else { "warn" }.to_string();
    config.logging.format = LogFormat::Compact;
    let metrics = telemetry::init_telemetry(&config.logging, &config.metrics)?;

    let format = cli.output;
    match cli.command {
        Commands::Events(args) => events::execute(args, &Context::open(&config, format).await?)?,
        Commands::State(args) => state::execute(args, &Context::open(&config, format).await?)?,
        Commands::Validate(args) => validate::execute(args, &Context::open(&config, format).await?)?,
        Commands::Chain(args) => chain::execute(args, &Context::open(&config, format).await?)?,
        Commands::Priority(args) => priority::execute(args, format)?,
        Commands::Config => commands::config::execute(&config, format)?,
    }

    // Stdout carries the command output, so the exposition goes to stderr.
    if metrics.is_enabled() {
        eprint!("{}", metrics.render());
    }
    Ok(())
}
