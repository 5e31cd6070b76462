//! Event definitions for the causal event log.
//!
//! This module provides:
//! - [`EventId`] and the closed [`EventType`] category set
//! - The immutable [`Event`] record and its validating [`EventBuilder`]
//! - [`EventFactory`], the producer-side handle that stamps causal context

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

use super::clock::VectorClock;
use crate::error::{ChronicleError, ErrorCode, Result};

/// Maximum accepted length of a task id.
pub const MAX_TASK_ID_LEN: usize = 255;

/// How far in the future an event timestamp may lie before it is rejected.
pub const MAX_FUTURE_SKEW_SECS: i64 = 60;

/// Flat key/value payload. Values must be JSON scalars.
pub type EventData = BTreeMap<String, serde_json::Value>;

// =============================================================================
// Event IDs
// =============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ChronicleError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s).map(Self).map_err(|e| {
            ChronicleError::with_internal(
                ErrorCode::InvalidEvent,
                format!("'{}' is not a valid event id", s),
                e.to_string(),
            )
        })
    }
}

// =============================================================================
// Event Types
// =============================================================================

/// Closed set of event categories.
///
/// Drives both the task state machine and scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Task lifecycle
    TaskStarted,
    TaskComplete,
    TaskFailed,

    // Requirements & planning
    RequirementsComplete,
    PlanningStarted,
    PlanningComplete,

    // Generation
    GenerationStarted,
    CodeGenerated,

    // Module lifecycle
    ModuleStarted,
    ModuleComplete,
    ModuleFailed,

    // Code versioning
    CodeVersionCreated,

    // Testing & corrections
    TestRunStarted,
    TestRunComplete,
    CorrectionApplied,

    // External feedback
    BugReport,
    UserIntervention,

    Error,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 18] = [
        EventType::TaskStarted,
        EventType::TaskComplete,
        EventType::TaskFailed,
        EventType::RequirementsComplete,
        EventType::PlanningStarted,
        EventType::PlanningComplete,
        EventType::GenerationStarted,
        EventType::CodeGenerated,
        EventType::ModuleStarted,
        EventType::ModuleComplete,
        EventType::ModuleFailed,
        EventType::CodeVersionCreated,
        EventType::TestRunStarted,
        EventType::TestRunComplete,
        EventType::CorrectionApplied,
        EventType::BugReport,
        EventType::UserIntervention,
        EventType::Error,
    ];

    /// The persisted string tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::TaskStarted => "TASK_STARTED",
            EventType::TaskComplete => "TASK_COMPLETE",
            EventType::TaskFailed => "TASK_FAILED",
            EventType::RequirementsComplete => "REQUIREMENTS_COMPLETE",
            EventType::PlanningStarted => "PLANNING_STARTED",
            EventType::PlanningComplete => "PLANNING_COMPLETE",
            EventType::GenerationStarted => "GENERATION_STARTED",
            EventType::CodeGenerated => "CODE_GENERATED",
            EventType::ModuleStarted => "MODULE_STARTED",
            EventType::ModuleComplete => "MODULE_COMPLETE",
            EventType::ModuleFailed => "MODULE_FAILED",
            EventType::CodeVersionCreated => "CODE_VERSION_CREATED",
            EventType::TestRunStarted => "TEST_RUN_STARTED",
            EventType::TestRunComplete => "TEST_RUN_COMPLETE",
            EventType::CorrectionApplied => "CORRECTION_APPLIED",
            EventType::BugReport => "BUG_REPORT",
            EventType::UserIntervention => "USER_INTERVENTION",
            EventType::Error => "ERROR",
        }
    }

    /// Feedback from outside the generation loop.
    pub const fn is_external_feedback(&self) -> bool {
        matches!(self, EventType::BugReport | EventType::UserIntervention)
    }

    /// Events that mark a new generation of code.
    pub const fn is_code_event(&self) -> bool {
        matches!(self, EventType::CodeVersionCreated | EventType::CodeGenerated)
    }

    /// Events whose effect on task state is limited to per-module tracking.
    pub const fn is_module_scoped(&self) -> bool {
        matches!(
            self,
            EventType::ModuleStarted
                | EventType::ModuleComplete
                | EventType::ModuleFailed
                | EventType::CodeGenerated
                | EventType::TestRunStarted
                | EventType::TestRunComplete
                | EventType::CorrectionApplied
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ChronicleError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| {
                ChronicleError::new(
                    ErrorCode::UnknownEventType,
                    format!("unknown event type '{}'", s),
                )
            })
    }
}

// =============================================================================
// Event
// =============================================================================

/// An immutable fact recorded in the log.
///
/// Events are created through [`Event::builder`] or an [`EventFactory`] and
/// gain their `sequence_number` only when appended to an
/// [`EventStore`](super::store::EventStore). There are no mutators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventRecord")]
pub struct Event {
    event_id: EventId,
    task_id: String,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    sequence_number: u64,
    vector_clock: VectorClock,
    causation_id: Option<EventId>,
    correlation_id: String,
    data: EventData,
    code_version: u64,
}

impl Event {
    /// Start building an event.
    pub fn builder(task_id: impl Into<String>, event_type: EventType) -> EventBuilder {
        EventBuilder::new(task_id, event_type)
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Store-assigned sequence number; 0 until appended.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Whether the event has been appended to a store.
    pub fn is_sequenced(&self) -> bool {
        self.sequence_number > 0
    }

    pub fn vector_clock(&self) -> &VectorClock {
        &self.vector_clock
    }

    pub fn causation_id(&self) -> Option<EventId> {
        self.causation_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Look up a string payload value.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Look up an unsigned integer payload value.
    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(|v| v.as_u64())
    }

    /// Look up a boolean payload value.
    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|v| v.as_bool())
    }

    pub fn code_version(&self) -> u64 {
        self.code_version
    }

    /// Copy of this event carrying the given sequence number.
    pub(crate) fn with_sequence(&self, sequence_number: u64) -> Event {
        Event {
            sequence_number,
            ..self.clone()
        }
    }
}

// =============================================================================
// Persisted Record
// =============================================================================

/// Flat wire form of an event, validated on conversion into [`Event`].
#[derive(Debug, Clone, Deserialize)]
struct EventRecord {
    event_id: EventId,
    task_id: String,
    event_type: EventType,
    timestamp: DateTime<Utc>,
    sequence_number: u64,
    vector_clock: VectorClock,
    #[serde(default)]
    causation_id: Option<EventId>,
    correlation_id: String,
    #[serde(default)]
    data: EventData,
    code_version: u64,
}

impl TryFrom<EventRecord> for Event {
    type Error = ChronicleError;

    fn try_from(record: EventRecord) -> Result<Self> {
        let task_id = sanitize_task_id(&record.task_id)?;
        validate_timestamp(record.timestamp, Utc::now())?;
        validate_data(&record.data)?;
        validate_correlation(&record.correlation_id)?;

        Ok(Event {
            event_id: record.event_id,
            task_id,
            event_type: record.event_type,
            timestamp: record.timestamp,
            sequence_number: record.sequence_number,
            vector_clock: record.vector_clock,
            causation_id: record.causation_id,
            correlation_id: record.correlation_id,
            data: record.data,
            code_version: record.code_version,
        })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Validating builder for [`Event`].
#[derive(Debug, Clone)]
pub struct EventBuilder {
    task_id: String,
    event_type: EventType,
    timestamp: Option<DateTime<Utc>>,
    vector_clock: VectorClock,
    causation_id: Option<EventId>,
    correlation_id: Option<String>,
    data: EventData,
    code_version: u64,
}

impl EventBuilder {
    fn new(task_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            task_id: task_id.into(),
            event_type,
            timestamp: None,
            vector_clock: VectorClock::new(),
            causation_id: None,
            correlation_id: None,
            data: EventData::new(),
            code_version: 0,
        }
    }

    /// Set the whole payload.
    pub fn data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    /// Add one payload entry.
    pub fn datum(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn code_version(mut self, code_version: u64) -> Self {
        self.code_version = code_version;
        self
    }

    pub fn vector_clock(mut self, clock: VectorClock) -> Self {
        self.vector_clock = clock;
        self
    }

    pub fn causation_id(mut self, id: EventId) -> Self {
        self.causation_id = Some(id);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Override the creation timestamp (defaults to now).
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Validate and produce the event. The sequence number is left unassigned.
    pub fn build(self) -> Result<Event> {
        let now = Utc::now();
        let task_id = sanitize_task_id(&self.task_id)?;
        let timestamp = self.timestamp.unwrap_or(now);
        validate_timestamp(timestamp, now)?;
        validate_data(&self.data)?;

        let correlation_id = match self.correlation_id {
            Some(id) => {
                validate_correlation(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        Ok(Event {
            event_id: EventId::new(),
            task_id,
            event_type: self.event_type,
            timestamp,
            sequence_number: 0,
            vector_clock: self.vector_clock,
            causation_id: self.causation_id,
            correlation_id,
            data: self.data,
            code_version: self.code_version,
        })
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Producer-side event factory.
///
/// Owns one participant's view of the vector clock. Every created event ticks
/// the participant's counter and carries a snapshot of the local clock;
/// [`observe`](Self::observe) folds in clocks of events this producer has seen.
#[derive(Debug, Clone)]
pub struct EventFactory {
    participant: String,
    clock: VectorClock,
}

impl EventFactory {
    pub fn new(participant: impl Into<String>) -> Result<Self> {
        let participant = participant.into();
        if participant.trim().is_empty() {
            return Err(ChronicleError::new(
                ErrorCode::EmptyParticipant,
                "event factory participant must not be empty",
            ));
        }
        Ok(Self {
            participant,
            clock: VectorClock::new(),
        })
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// The producer's current local clock.
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Merge the clock of a received event into the local clock.
    pub fn observe(&mut self, event: &Event) {
        self.clock.merge(event.vector_clock());
    }

    /// Create an event stamped with a fresh tick of the local clock.
    pub fn create(
        &mut self,
        task_id: impl Into<String>,
        event_type: EventType,
        data: EventData,
        code_version: u64,
    ) -> Result<Event> {
        self.emit(Event::builder(task_id, event_type).data(data).code_version(code_version))
    }

    /// Create an event caused by `cause`: observes it first, then links
    /// causation and correlation to it.
    pub fn create_caused_by(
        &mut self,
        cause: &Event,
        event_type: EventType,
        data: EventData,
        code_version: u64,
    ) -> Result<Event> {
        self.observe(cause);
        self.emit(
            Event::builder(cause.task_id(), event_type)
                .data(data)
                .code_version(code_version)
                .causation_id(cause.event_id())
                .correlation_id(cause.correlation_id()),
        )
    }

    /// Stamp a builder with the next clock tick and build it. The local clock
    /// only advances when the event is valid.
    pub fn emit(&mut self, builder: EventBuilder) -> Result<Event> {
        let mut next = self.clock.clone();
        next.tick(&self.participant)?;
        let event = builder.vector_clock(next.clone()).build()?;
        self.clock = next;
        Ok(event)
    }
}

// =============================================================================
// Validation
// =============================================================================

fn task_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:\-]*$").expect("task id pattern is valid")
    })
}

/// Trim and validate a task id.
pub fn sanitize_task_id(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ChronicleError::new(ErrorCode::InvalidTaskId, "task_id must not be empty"));
    }
    if trimmed.len() > MAX_TASK_ID_LEN {
        return Err(ChronicleError::new(
            ErrorCode::InvalidTaskId,
            format!("task_id exceeds {} characters", MAX_TASK_ID_LEN),
        ));
    }
    if !task_id_pattern().is_match(trimmed) {
        return Err(ChronicleError::new(
            ErrorCode::InvalidTaskId,
            format!("task_id '{}' contains disallowed characters", trimmed),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_timestamp(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if timestamp > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
        return Err(ChronicleError::new(
            ErrorCode::FutureTimestamp,
            format!(
                "timestamp {} is more than {}s in the future",
                timestamp.to_rfc3339(),
                MAX_FUTURE_SKEW_SECS
            ),
        ));
    }
    Ok(())
}

fn validate_data(data: &EventData) -> Result<()> {
    for (key, value) in data {
        if key.is_empty() {
            return Err(ChronicleError::new(ErrorCode::InvalidPayload, "payload keys must not be empty"));
        }
        if value.is_object() || value.is_array() {
            return Err(ChronicleError::new(
                ErrorCode::InvalidPayload,
                format!("payload value for '{}' must be a scalar", key),
            ));
        }
    }
    Ok(())
}

fn validate_correlation(correlation_id: &str) -> Result<()> {
    if correlation_id.trim().is_empty() {
        return Err(ChronicleError::invalid_event("correlation_id must not be empty"));
    }
    Ok(())
}
