//! Append-only event store.
//!
//! The store is the single source of truth: it assigns sequence numbers,
//! answers filtered queries, and persists the log as a JSON array of flat
//! event records. Saves go through a temp file in the target directory and a
//! rename so a crash mid-write never corrupts the previous durable copy.

use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::instrument;

use super::event::{Event, EventId, EventType};
use crate::error::{ChronicleError, ErrorCode, ErrorDetails, Result};

// =============================================================================
// Filter
// =============================================================================

/// Filter for querying events. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub task_id: Option<String>,
    pub event_type: Option<EventType>,
    pub correlation_id: Option<String>,
}

impl EventFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Default::default()
        }
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(task_id) = &self.task_id {
            if event.task_id() != task_id {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type() != event_type {
                return false;
            }
        }
        if let Some(correlation_id) = &self.correlation_id {
            if event.correlation_id() != correlation_id {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Load Report
// =============================================================================

/// Outcome of [`EventStore::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Records reconstructed into the log.
    pub loaded: usize,
    /// Records that failed validation and were dropped.
    pub skipped: usize,
    /// Highest sequence number seen (0 for an empty log).
    pub max_sequence: u64,
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug)]
struct LogState {
    events: Vec<Event>,
    ids: HashSet<EventId>,
    next_sequence: u64,
}

impl Default for LogState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            ids: HashSet::new(),
            next_sequence: 1,
        }
    }
}

/// Append-only, sequencing event log with optional file persistence.
#[derive(Debug, Default)]
pub struct EventStore {
    state: Mutex<LogState>,
    path: Option<PathBuf>,
}

impl EventStore {
    /// In-memory store with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by the given file for `save` and `load`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an event, assigning it the next sequence number.
    ///
    /// Rejects events whose id is already present and events that already
    /// carry a sequence number. Returns the stored copy.
    #[instrument(skip(self, event), fields(event_id = %event.event_id(), event_type = %event.event_type()))]
    pub fn append(&self, event: Event) -> Result<Event> {
        if event.is_sequenced() {
            return Err(ChronicleError::new(
                ErrorCode::SequenceAlreadyAssigned,
                format!(
                    "event {} already carries sequence number {}",
                    event.event_id(),
                    event.sequence_number()
                ),
            )
            .with_context("event_id", event.event_id().to_string()));
        }

        let stored = {
            let mut state = self.state.lock();
            if state.ids.contains(&event.event_id()) {
                return Err(ChronicleError::new(
                    ErrorCode::DuplicateEvent,
                    format!("event {} already exists", event.event_id()),
                )
                .with_details(ErrorDetails::new().with_entity("event", event.event_id().to_string())));
            }

            let stored = event.with_sequence(state.next_sequence);
            state.next_sequence += 1;
            state.ids.insert(stored.event_id());
            state.events.push(stored.clone());
            stored
        };

        counter!("chronicle_events_appended_total", "event_type" => stored.event_type().as_str())
            .increment(1);
        tracing::debug!(
            task_id = %stored.task_id(),
            sequence_number = stored.sequence_number(),
            "Event appended"
        );

        Ok(stored)
    }

    /// Snapshot of events matching `filter`, in append order.
    pub fn get_events(&self, filter: &EventFilter) -> Vec<Event> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Snapshot of the full log.
    pub fn all_events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn get_event(&self, event_id: EventId) -> Option<Event> {
        self.state
            .lock()
            .events
            .iter()
            .find(|e| e.event_id() == event_id)
            .cloned()
    }

    /// Most recently appended event of `task_id` whose type is one of `types`.
    pub fn latest_of_type(&self, task_id: &str, types: &[EventType]) -> Option<Event> {
        self.state
            .lock()
            .events
            .iter()
            .rev()
            .find(|e| e.task_id() == task_id && types.contains(&e.event_type()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    /// Sequence number of the last appended event (0 when empty).
    pub fn last_sequence(&self) -> u64 {
        self.state.lock().next_sequence - 1
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the full log to the backing file atomically.
    #[instrument(skip(self))]
    pub async fn save(&self) -> Result<()> {
        let path = self.require_path()?.to_path_buf();
        let bytes = {
            let state = self.state.lock();
            serde_json::to_vec_pretty(&state.events)?
        };
        let count = bytes.len();

        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| ChronicleError::internal(format!("save task failed: {}", e)))??;

        tracing::info!(path = ?self.path, bytes = count, "Event log saved");
        Ok(())
    }

    /// Replace the in-memory log with the backing file's contents.
    ///
    /// A missing file loads as an empty log. Records that fail validation are
    /// skipped and counted; a file that is unreadable or whose top level is
    /// not a JSON array is an error and leaves the in-memory log untouched.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<LoadReport> {
        let path = self.require_path()?.to_path_buf();

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No event log found, starting empty");
                *self.state.lock() = LogState::default();
                return Ok(LoadReport::default());
            }
            Err(e) => {
                return Err(ChronicleError::persistence(
                    format!("failed to read event log {}", path.display()),
                    e,
                ))
            }
        };

        let (state, report) = decode_log(&raw)?;
        *self.state.lock() = state;

        if report.skipped > 0 {
            counter!("chronicle_load_skipped_total").increment(report.skipped as u64);
            tracing::warn!(
                path = %path.display(),
                skipped = report.skipped,
                "Skipped invalid event records during load"
            );
        }
        tracing::info!(
            path = %path.display(),
            loaded = report.loaded,
            max_sequence = report.max_sequence,
            "Event log loaded"
        );

        Ok(report)
    }

    fn require_path(&self) -> Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            ChronicleError::new(
                ErrorCode::StorePathNotConfigured,
                "event store has no backing file",
            )
        })
    }
}

fn decode_log(raw: &[u8]) -> Result<(LogState, LoadReport)> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| {
        ChronicleError::with_internal(ErrorCode::CorruptLog, "event log is not valid JSON", e.to_string())
    })?;
    let records = match value {
        serde_json::Value::Array(records) => records,
        other => {
            return Err(ChronicleError::new(
                ErrorCode::CorruptLog,
                format!("event log top level must be an array, found {}", json_kind(&other)),
            ))
        }
    };

    let mut report = LoadReport::default();
    let mut events: Vec<Event> = Vec::with_capacity(records.len());
    let mut ids = HashSet::with_capacity(records.len());
    let mut sequences = HashSet::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let event = match serde_json::from_value::<Event>(record) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping malformed event record");
                report.skipped += 1;
                continue;
            }
        };
        if !event.is_sequenced()
            || ids.contains(&event.event_id())
            || sequences.contains(&event.sequence_number())
        {
            tracing::warn!(
                index,
                event_id = %event.event_id(),
                sequence_number = event.sequence_number(),
                "Skipping unsequenced or duplicate event record"
            );
            report.skipped += 1;
            continue;
        }
        ids.insert(event.event_id());
        sequences.insert(event.sequence_number());
        report.max_sequence = report.max_sequence.max(event.sequence_number());
        events.push(event);
    }

    events.sort_by_key(|e| e.sequence_number());
    report.loaded = events.len();

    let state = LogState {
        events,
        ids,
        next_sequence: report.max_sequence + 1,
    };
    Ok((state, report))
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| ChronicleError::persistence(format!("failed to create {}", dir.display()), e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|e| ChronicleError::persistence("failed to create temp file", e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ChronicleError::persistence("failed to write temp file", e))?;
    tmp.persist(path).map_err(|e| {
        ChronicleError::persistence(format!("failed to replace {}", path.display()), e.error)
    })?;
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(task_id: &str, event_type: EventType) -> Event {
        Event::builder(task_id, event_type).build().unwrap()
    }

    #[test]
    fn test_append_assigns_sequence_from_one() {
        let store = EventStore::new();
        let first = store.append(event("t1", EventType::TaskStarted)).unwrap();
        let second = store.append(event("t1", EventType::PlanningStarted)).unwrap();

        assert_eq!(first.sequence_number(), 1);
        assert_eq!(second.sequence_number(), 2);
        assert_eq!(store.last_sequence(), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_append_rejects_duplicate_id() {
        let store = EventStore::new();
        let e = event("t1", EventType::TaskStarted);
        store.append(e.clone()).unwrap();

        let err = store.append(e).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateEvent);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_rejects_sequenced_event() {
        let store = EventStore::new();
        let stored = store.append(event("t1", EventType::TaskStarted)).unwrap();

        let other = EventStore::new();
        let err = other.append(stored).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SequenceAlreadyAssigned);
    }

    #[test]
    fn test_concurrent_appends_are_gap_free() {
        let store = Arc::new(EventStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| store.append(event("t1", EventType::CodeGenerated)).unwrap().sequence_number())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seqs: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=200).collect::<Vec<_>>());
    }

    #[test]
    fn test_filters_combine() {
        let store = EventStore::new();
        let started = store.append(event("t1", EventType::TaskStarted)).unwrap();
        store.append(event("t2", EventType::TaskStarted)).unwrap();
        store.append(event("t1", EventType::BugReport)).unwrap();

        assert_eq!(store.get_events(&EventFilter::all()).len(), 3);
        assert_eq!(store.get_events(&EventFilter::for_task("t1")).len(), 2);
        assert_eq!(
            store
                .get_events(&EventFilter::for_task("t1").with_event_type(EventType::TaskStarted))
                .len(),
            1
        );
        let by_corr = store.get_events(&EventFilter::all().with_correlation(started.correlation_id()));
        assert_eq!(by_corr, vec![started]);
    }

    #[test]
    fn test_latest_of_type() {
        let store = EventStore::new();
        store.append(Event::builder("t1", EventType::CodeVersionCreated).code_version(1).build().unwrap()).unwrap();
        store.append(Event::builder("t1", EventType::CodeVersionCreated).code_version(2).build().unwrap()).unwrap();
        store.append(event("t1", EventType::BugReport)).unwrap();

        let latest = store
            .latest_of_type("t1", &[EventType::CodeVersionCreated, EventType::CodeGenerated])
            .unwrap();
        assert_eq!(latest.code_version(), 2);
        assert!(store.latest_of_type("t2", &[EventType::CodeVersionCreated]).is_none());
    }

    #[tokio::test]
    async fn test_save_without_path_fails() {
        let store = EventStore::new();
        let err = store.save().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StorePathNotConfigured);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::with_path(dir.path().join("absent.json"));
        let report = store.load().await.unwrap();
        assert_eq!(report, LoadReport::default());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_load_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        std::fs::write(&path, r#"{"events": []}"#).unwrap();

        let store = EventStore::with_path(&path);
        let err = store.load().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptLog);
    }

    #[tokio::test]
    async fn test_load_continues_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");

        let store = EventStore::with_path(&path);
        store.append(event("t1", EventType::TaskStarted)).unwrap();
        store.append(event("t1", EventType::TaskComplete)).unwrap();
        store.save().await.unwrap();

        let reloaded = EventStore::with_path(&path);
        let report = reloaded.load().await.unwrap();
        assert_eq!(report.max_sequence, 2);

        let next = reloaded.append(event("t1", EventType::BugReport)).unwrap();
        assert_eq!(next.sequence_number(), 3);
    }
}
