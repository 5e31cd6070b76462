//! Subcommand implementations.

pub mod chain;
pub mod config;
pub mod events;
pub mod priority;
pub mod state;
pub mod validate;

use anyhow::{Context as _, Result};
use chronicle_core::events::{Event, EventId, EventStore};
use chronicle_core::config::Config;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

/// Shared state handed to commands that read the event log.
pub struct Context {
    pub store: EventStore,
    pub format: OutputFormat,
}

impl Context {
    /// Open and load the event log named by the configuration.
    pub async fn open(config: &Config, format: OutputFormat) -> Result<Self> {
        let store = EventStore::with_path(&config.store.path);
        let report = store
            .load()
            .await
            .with_context(|| format!("Failed to load event log {}", config.store.path.display()))?;

        if report.skipped > 0 {
            output::print_warning(&format!(
                "Skipped {} invalid record(s) in {}",
                report.skipped,
                config.store.path.display()
            ));
        }
        tracing::debug!(loaded = report.loaded, max_sequence = report.max_sequence, "Event log opened");

        Ok(Self { store, format })
    }

    /// Look up an event by full id or unique id prefix.
    pub fn find_event(&self, id: &str) -> Result<Event> {
        if let Ok(event_id) = id.parse::<EventId>() {
            return self
                .store
                .get_event(event_id)
                .with_context(|| format!("Event {} not found", id));
        }

        let mut matches = self
            .store
            .all_events()
            .into_iter()
            .filter(|e| e.event_id().to_string().starts_with(id));
        let first = matches
            .next()
            .with_context(|| format!("No event id starts with '{}'", id))?;
        if matches.next().is_some() {
            anyhow::bail!("Event id prefix '{}' is ambiguous", id);
        }
        Ok(first)
    }
}

/// Table row for an event listing.
#[derive(Debug, Serialize, Tabled)]
pub struct EventRow {
    #[tabled(rename = "Seq")]
    pub sequence: u64,
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Task")]
    pub task_id: String,
    #[tabled(rename = "Type")]
    pub event_type: String,
    #[tabled(rename = "Version")]
    pub code_version: u64,
    #[tabled(rename = "Clock")]
    pub clock: String,
    #[tabled(rename = "Timestamp")]
    pub timestamp: String,
}

impl From<&Event> for EventRow {
    fn from(event: &Event) -> Self {
        Self {
            sequence: event.sequence_number(),
            id: output::short_id(&event.event_id().to_string()),
            task_id: event.task_id().to_string(),
            event_type: event.event_type().to_string(),
            code_version: event.code_version(),
            clock: event.vector_clock().to_string(),
            timestamp: event.timestamp().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Print events as rows in table mode, or as full records otherwise.
pub fn print_events(events: &[Event], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let rows: Vec<EventRow> = events.iter().map(EventRow::from).collect();
            output::print_list(&rows, format)
        }
        _ => output::print_item(&events, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::events::EventType;

    #[tokio::test]
    async fn test_context_finds_events_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = dir.path().join("events.json");

        let writer = EventStore::with_path(&config.store.path);
        let started = writer
            .append(Event::builder("t1", EventType::TaskStarted).build().unwrap())
            .unwrap();
        writer.save().await.unwrap();

        let ctx = Context::open(&config, OutputFormat::Json).await.unwrap();
        assert_eq!(ctx.store.len(), 1);
        assert_eq!(ctx.format, OutputFormat::Json);

        let id = started.event_id().to_string();
        assert_eq!(ctx.find_event(&id).unwrap(), started);
        assert_eq!(ctx.find_event(&id[..8]).unwrap(), started);
        assert!(ctx.find_event("zzzz").is_err());
    }

    #[tokio::test]
    async fn test_context_opens_missing_log_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = dir.path().join("absent.json");

        let ctx = Context::open(&config, OutputFormat::Table).await.unwrap();
        assert!(ctx.store.is_empty());
    }
}
