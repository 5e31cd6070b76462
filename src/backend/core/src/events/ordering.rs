//! Causal ordering and staleness validation.
//!
//! Feedback (bug reports, test results, user interventions) is only actionable
//! against the code it was produced for. [`EventOrdering`] decides whether a
//! report still applies to the current code event and answers causal-chain
//! queries over a set of events. Sequence order alone never implies a causal
//! edge; only vector clocks do.

use serde::Serialize;
use std::fmt;

use super::event::Event;

/// Why a report was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StalenessReason {
    /// The report targets a different code version.
    StaleVersion { report_version: u64, current_version: u64 },
    /// Neither event causally precedes the other.
    ConcurrentBranch,
    /// The report causally precedes the current code.
    PredatesCode,
    /// The report was appended before the current code event.
    OutOfOrder { report_sequence: u64, current_sequence: u64 },
}

impl StalenessReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StalenessReason::StaleVersion { .. } => "stale version",
            StalenessReason::ConcurrentBranch => "concurrent branch",
            StalenessReason::PredatesCode => "predates code",
            StalenessReason::OutOfOrder { .. } => "out of order",
        }
    }
}

impl fmt::Display for StalenessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalenessReason::StaleVersion { report_version, current_version } => write!(
                f,
                "stale version (report v{}, current v{})",
                report_version, current_version
            ),
            StalenessReason::OutOfOrder { report_sequence, current_sequence } => write!(
                f,
                "out of order (report #{}, current #{})",
                report_sequence, current_sequence
            ),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Result of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "validity", rename_all = "snake_case")]
pub enum ReportValidity {
    Valid,
    Stale(StalenessReason),
}

impl ReportValidity {
    pub fn is_valid(&self) -> bool {
        matches!(self, ReportValidity::Valid)
    }

    pub fn reason(&self) -> Option<StalenessReason> {
        match self {
            ReportValidity::Valid => None,
            ReportValidity::Stale(reason) => Some(*reason),
        }
    }
}

impl fmt::Display for ReportValidity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportValidity::Valid => f.write_str("valid"),
            ReportValidity::Stale(reason) => write!(f, "stale: {}", reason),
        }
    }
}

/// Causal queries over events.
pub struct EventOrdering;

impl EventOrdering {
    /// Decide whether `report` is actionable against `current_code`.
    ///
    /// Checks run in order and stop at the first failure: matching code
    /// version, report clock strictly after the code clock, report appended
    /// after the code event.
    pub fn is_report_valid_for_current_code(report: &Event, current_code: &Event) -> ReportValidity {
        if report.code_version() != current_code.code_version() {
            return ReportValidity::Stale(StalenessReason::StaleVersion {
                report_version: report.code_version(),
                current_version: current_code.code_version(),
            });
        }

        let report_clock = report.vector_clock();
        let code_clock = current_code.vector_clock();
        if !report_clock.happens_after(code_clock) {
            let reason = if report_clock.happens_before(code_clock) {
                StalenessReason::PredatesCode
            } else {
                StalenessReason::ConcurrentBranch
            };
            return ReportValidity::Stale(reason);
        }

        if report.sequence_number() <= current_code.sequence_number() {
            return ReportValidity::Stale(StalenessReason::OutOfOrder {
                report_sequence: report.sequence_number(),
                current_sequence: current_code.sequence_number(),
            });
        }

        ReportValidity::Valid
    }

    /// Total order by sequence number, event id breaking ties.
    pub fn sort_events_causal(events: &[Event]) -> Vec<Event> {
        let mut sorted = events.to_vec();
        sorted.sort_by_key(|e| (e.sequence_number(), e.event_id()));
        sorted
    }

    /// `start` plus every event that `start` causally precedes, sorted.
    pub fn find_causal_chain(start: &Event, all: &[Event]) -> Vec<Event> {
        let mut chain: Vec<Event> = all
            .iter()
            .filter(|e| {
                e.event_id() != start.event_id() && start.vector_clock().happens_before(e.vector_clock())
            })
            .cloned()
            .collect();
        chain.push(start.clone());
        Self::sort_events_causal(&chain)
    }

    /// Events other than `reference` with no causal relation to it.
    pub fn find_concurrent_events(reference: &Event, all: &[Event]) -> Vec<Event> {
        all.iter()
            .filter(|e| {
                e.event_id() != reference.event_id()
                    && e.vector_clock().concurrent_with(reference.vector_clock())
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventData, EventFactory, EventStore, EventType};

    struct Fixture {
        store: EventStore,
        generator: EventFactory,
        tester: EventFactory,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: EventStore::new(),
                generator: EventFactory::new("generator").unwrap(),
                tester: EventFactory::new("tester").unwrap(),
            }
        }

        fn code(&mut self, version: u64) -> Event {
            let event = self
                .generator
                .create("task-1", EventType::CodeVersionCreated, EventData::new(), version)
                .unwrap();
            self.store.append(event).unwrap()
        }

        fn report_after(&mut self, code: &Event, version: u64) -> Event {
            let event = self
                .tester
                .create_caused_by(code, EventType::BugReport, EventData::new(), version)
                .unwrap();
            self.store.append(event).unwrap()
        }
    }

    #[test]
    fn test_valid_report() {
        let mut fx = Fixture::new();
        let code = fx.code(1);
        let report = fx.report_after(&code, 1);

        let validity = EventOrdering::is_report_valid_for_current_code(&report, &code);
        assert_eq!(validity, ReportValidity::Valid);
        assert!(validity.is_valid());
    }

    #[test]
    fn test_stale_version() {
        let mut fx = Fixture::new();
        let v1 = fx.code(1);
        let report = fx.report_after(&v1, 1);
        let v2 = fx.code(2);

        let validity = EventOrdering::is_report_valid_for_current_code(&report, &v2);
        assert_eq!(validity.reason().map(|r| r.as_str()), Some("stale version"));
    }

    #[test]
    fn test_concurrent_branch() {
        let mut fx = Fixture::new();
        let code = fx.code(1);
        // Tester never observed the code event.
        let report = fx
            .tester
            .create("task-1", EventType::BugReport, EventData::new(), 1)
            .unwrap();
        let report = fx.store.append(report).unwrap();

        let validity = EventOrdering::is_report_valid_for_current_code(&report, &code);
        assert_eq!(validity, ReportValidity::Stale(StalenessReason::ConcurrentBranch));
    }

    #[test]
    fn test_equal_clocks_are_concurrent_branch() {
        let mut fx = Fixture::new();
        let code = fx.code(1);
        let twin = Event::builder("task-1", EventType::BugReport)
            .vector_clock(code.vector_clock().clone())
            .code_version(1)
            .build()
            .unwrap();
        let twin = fx.store.append(twin).unwrap();

        let validity = EventOrdering::is_report_valid_for_current_code(&twin, &code);
        assert_eq!(validity, ReportValidity::Stale(StalenessReason::ConcurrentBranch));
    }

    #[test]
    fn test_predates_code() {
        let mut fx = Fixture::new();
        let report = fx
            .generator
            .create("task-1", EventType::BugReport, EventData::new(), 1)
            .unwrap();
        let report = fx.store.append(report).unwrap();
        let code = fx.code(1);

        let validity = EventOrdering::is_report_valid_for_current_code(&report, &code);
        assert_eq!(validity, ReportValidity::Stale(StalenessReason::PredatesCode));
    }

    #[test]
    fn test_out_of_order() {
        let mut fx = Fixture::new();
        let code = fx.generator
            .create("task-1", EventType::CodeVersionCreated, EventData::new(), 1)
            .unwrap();
        let report = fx
            .tester
            .create_caused_by(&code, EventType::BugReport, EventData::new(), 1)
            .unwrap();
        // Report reaches the log first.
        let report = fx.store.append(report).unwrap();
        let code = fx.store.append(code).unwrap();

        let validity = EventOrdering::is_report_valid_for_current_code(&report, &code);
        assert_eq!(validity.reason().map(|r| r.as_str()), Some("out of order"));
    }

    #[test]
    fn test_causal_chain_and_concurrent_events() {
        let mut fx = Fixture::new();
        let code = fx.code(1);
        let report = fx.report_after(&code, 1);
        let unrelated = fx
            .store
            .append(
                EventFactory::new("observer")
                    .unwrap()
                    .create("task-1", EventType::UserIntervention, EventData::new(), 1)
                    .unwrap(),
            )
            .unwrap();
        let all = fx.store.all_events();

        let chain = EventOrdering::find_causal_chain(&code, &all);
        assert_eq!(chain, vec![code.clone(), report.clone()]);

        let concurrent = EventOrdering::find_concurrent_events(&code, &all);
        assert_eq!(concurrent, vec![unrelated]);
    }

    #[test]
    fn test_sort_by_sequence() {
        let mut fx = Fixture::new();
        let a = fx.code(1);
        let b = fx.code(2);
        let sorted = EventOrdering::sort_events_causal(&[b.clone(), a.clone()]);
        assert_eq!(sorted, vec![a, b]);
    }
}
