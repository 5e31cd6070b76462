//! Causal event log
//!
//! This module provides the event-sourcing side of Chronicle:
//!
//! - **`clock`**: Vector clocks for causal ordering between logical participants.
//! - **`event`**: The immutable `Event` record, its builder, and the producer `EventFactory`.
//! - **`store`**: The append-only, sequencing `EventStore` with atomic file persistence.
//! - **`ordering`**: Staleness validation and causal-chain queries.
//! - **`projection`**: Deterministic replay of events into `TaskState`.

pub mod clock;
pub mod event;
pub mod ordering;
pub mod projection;
pub mod store;

pub use clock::*;
pub use event::*;
pub use ordering::*;
pub use projection::*;
pub use store::*;
