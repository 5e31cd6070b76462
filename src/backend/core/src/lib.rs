#![allow(clippy::result_large_err)]
//! # Chronicle Core
//!
//! Causal event log and priority task orchestrator for autonomous coding agents.
//!
//! ## Architecture
//!
//! - **Events**: Append-only log with vector-clock causality, atomic persistence,
//!   staleness validation and deterministic state projection
//! - **Orchestrator**: Bounded priority queue, concurrency-limited workers,
//!   per-task deadlines and debounced backpressure alerts
//! - **Telemetry**: Structured logging and Prometheus metrics
//! - **Config**: Layered file + environment configuration
//! - **Runtime**: [`runtime::Chronicle`] wires one store and one orchestrator together
//!
//! Priority connects the two halves: work triggered by an event is scheduled
//! at the priority its event type maps to, and feedback is checked against
//! the current code event before any work is scheduled for it.

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod runtime;
pub mod telemetry;

pub use error::{ChronicleError, ErrorCode, ErrorDetails, ErrorSeverity, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ChronicleError, ErrorCode, Result};
    pub use crate::events::{
        rebuild_all, rebuild_state, Aggregate, Event, EventBuilder, EventData, EventFactory,
        EventFilter, EventId, EventOrdering, EventStore, EventType, LoadReport, ReportValidity,
        StalenessReason, TaskState, TaskStatus, VectorClock,
    };
    pub use crate::orchestrator::{
        AlertLevel, BackpressureConfig, BackpressureMonitor, OrchestratorConfig, QueueStats,
        TaskHandle, TaskOrchestrator, TaskOutcome, TaskPriority, TaskPriorityAssigner,
    };
    pub use crate::runtime::{Chronicle, Dispatch};
}
