//! Error handling for Chronicle Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable [`ErrorCode`]
//! - User-facing vs internal messages
//! - Structured [`ErrorDetails`] for entity context
//! - Severity-aware logging with tracing
//! - Error counters through the `metrics` facade
//!
//! # Usage
//!
//! ```rust,ignore
//! use chronicle_core::error::{ChronicleError, ErrorCode, Result};
//!
//! fn check(task_id: &str) -> Result<()> {
//!     if task_id.is_empty() {
//!         return Err(ChronicleError::new(ErrorCode::InvalidTaskId, "task_id must not be empty"));
//!     }
//!     Ok(())
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Chronicle operations.
pub type Result<T> = std::result::Result<T, ChronicleError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Event validation (1000-1099)
    InvalidEvent,
    InvalidTaskId,
    FutureTimestamp,
    InvalidPayload,
    UnknownEventType,

    // Vector clock (1100-1199)
    InvalidVectorClock,
    EmptyParticipant,
    NegativeCounter,

    // Store & persistence (2000-2099)
    DuplicateEvent,
    SequenceAlreadyAssigned,
    PersistenceFailed,
    CorruptLog,
    StorePathNotConfigured,
    EventNotFound,

    // Orchestrator (3000-3099)
    OrchestratorShutDown,
    OrchestratorAlreadyStarted,

    // Serialization (4000-4099)
    SerializationError,
    DeserializationError,

    // Configuration (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidEvent => 1000,
            Self::InvalidTaskId => 1001,
            Self::FutureTimestamp => 1002,
            Self::InvalidPayload => 1003,
            Self::UnknownEventType => 1004,

            Self::InvalidVectorClock => 1100,
            Self::EmptyParticipant => 1101,
            Self::NegativeCounter => 1102,

            Self::DuplicateEvent => 2000,
            Self::SequenceAlreadyAssigned => 2001,
            Self::PersistenceFailed => 2002,
            Self::CorruptLog => 2003,
            Self::StorePathNotConfigured => 2004,
            Self::EventNotFound => 2005,

            Self::OrchestratorShutDown => 3000,
            Self::OrchestratorAlreadyStarted => 3001,

            Self::SerializationError => 4000,
            Self::DeserializationError => 4001,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "event",
            1100..=1199 => "vector_clock",
            2000..=2099 => "store",
            3000..=3099 => "orchestrator",
            4000..=4099 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, validation failures)
    Low,
    /// Operational issues (usage after shutdown)
    Medium,
    /// System errors (persistence failures, corrupt data)
    High,
    /// Bugs
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidEvent
            | ErrorCode::InvalidTaskId
            | ErrorCode::FutureTimestamp
            | ErrorCode::InvalidPayload
            | ErrorCode::UnknownEventType
            | ErrorCode::InvalidVectorClock
            | ErrorCode::EmptyParticipant
            | ErrorCode::NegativeCounter
            | ErrorCode::DuplicateEvent
            | ErrorCode::SequenceAlreadyAssigned
            | ErrorCode::EventNotFound => Self::Low,

            ErrorCode::OrchestratorShutDown
            | ErrorCode::OrchestratorAlreadyStarted
            | ErrorCode::StorePathNotConfigured => Self::Medium,

            ErrorCode::PersistenceFailed
            | ErrorCode::CorruptLog
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (event, task, work item)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Chronicle Core.
#[derive(Error, Debug)]
pub struct ChronicleError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-facing error message
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ChronicleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl ChronicleError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create an event validation error.
    pub fn invalid_event(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidEvent, message)
    }

    /// Create a vector clock validation error.
    pub fn invalid_clock(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidVectorClock, message)
    }

    /// Create a persistence error wrapping an I/O failure.
    pub fn persistence(message: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::PersistenceFailed, message, source.to_string())
            .with_source(source)
    }

    /// Create the error returned for any use of an orchestrator after shutdown.
    pub fn shut_down(operation: &str) -> Self {
        Self::new(
            ErrorCode::OrchestratorShutDown,
            format!("orchestrator is shut down; cannot {}", operation),
        )
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::EventNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical | ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    "Chronicle error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Chronicle error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Rejected input"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "chronicle_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for ChronicleError {
    fn from(err: serde_json::Error) -> Self {
        let code = if err.is_data() || err.is_syntax() || err.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };
        Self::with_internal(code, "JSON processing failed", err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for ChronicleError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence("I/O operation failed", err)
    }
}

impl From<config::ConfigError> for ChronicleError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Failed to load configuration",
            err.to_string(),
        )
        .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes_fall_in_category_ranges() {
        assert_eq!(ErrorCode::InvalidTaskId.category(), "event");
        assert_eq!(ErrorCode::NegativeCounter.category(), "vector_clock");
        assert_eq!(ErrorCode::CorruptLog.category(), "store");
        assert_eq!(ErrorCode::OrchestratorShutDown.category(), "orchestrator");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_display_includes_code_and_internal_message() {
        let err = ChronicleError::with_internal(
            ErrorCode::PersistenceFailed,
            "could not save log",
            "disk full",
        );
        let rendered = err.to_string();
        assert!(rendered.contains("PersistenceFailed"));
        assert!(rendered.contains("could not save log"));
        assert!(rendered.contains("disk full"));
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ChronicleError::invalid_event("bad").severity(), ErrorSeverity::Low);
        assert_eq!(ChronicleError::shut_down("submit").severity(), ErrorSeverity::Medium);
        assert_eq!(ChronicleError::internal("bug").severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_not_found_carries_entity() {
        let err = ChronicleError::not_found("event", "abc");
        assert_eq!(err.details().entity_type.as_deref(), Some("event"));
        assert_eq!(err.details().entity_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_context_is_recorded() {
        let err = ChronicleError::new(ErrorCode::DuplicateEvent, "dup").with_context("sequence_number", 7);
        assert_eq!(err.details().context["sequence_number"], serde_json::json!(7));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ChronicleError = parse.unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }
}
