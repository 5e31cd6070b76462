//! Vector clocks for causal ordering of events.
//!
//! Each participant (a logical role inside the process such as `planner`,
//! `generator` or `test_runner`) owns one counter. Comparing two clocks tells
//! whether one event causally precedes another or whether they are concurrent,
//! without consulting wall-clock time.
//!
//! Zero counters are never stored: a participant that has not ticked is simply
//! absent, so `{a: 0}` and `{}` are the same clock.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ChronicleError, ErrorCode, Result};

/// Per-participant logical counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, i64>", into = "BTreeMap<String, u64>")]
pub struct VectorClock {
    counters: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock from explicit counters.
    ///
    /// Rejects empty participant ids and negative counters.
    pub fn from_counters<I, K>(counters: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        let mut clock = Self::new();
        for (participant, value) in counters {
            let participant = participant.into();
            validate_participant(&participant)?;
            if value < 0 {
                return Err(ChronicleError::new(
                    ErrorCode::NegativeCounter,
                    format!("counter for '{}' is negative ({})", participant, value),
                ));
            }
            if value > 0 {
                clock.counters.insert(participant, value as u64);
            }
        }
        Ok(clock)
    }

    /// Increment exactly one participant's counter by 1.
    pub fn tick(&mut self, participant: &str) -> Result<&Self> {
        validate_participant(participant)?;
        let counter = self.counters.entry(participant.to_string()).or_insert(0);
        *counter = counter.checked_add(1).ok_or_else(|| {
            ChronicleError::invalid_clock(format!("counter for '{}' overflowed", participant))
        })?;
        Ok(self)
    }

    /// Elementwise maximum with `other`.
    pub fn merge(&mut self, other: &VectorClock) -> &Self {
        for (participant, &value) in &other.counters {
            let entry = self.counters.entry(participant.clone()).or_insert(0);
            *entry = (*entry).max(value);
        }
        self
    }

    /// Returns a new clock that is the merge of `self` and `other`.
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Counter for a participant (0 if absent).
    pub fn get(&self, participant: &str) -> u64 {
        self.counters.get(participant).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Iterate over `(participant, counter)` pairs in participant order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// True iff every counter of `self` is ≤ the one in `other` and at least
    /// one is strictly less. Equal clocks do not happen-before each other.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        matches!(self.causal_cmp(other), Some(Ordering::Less))
    }

    /// True iff `other` happens-before `self`.
    pub fn happens_after(&self, other: &VectorClock) -> bool {
        other.happens_before(self)
    }

    /// True iff neither clock happens-before the other. Equal clocks are concurrent.
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }

    /// Partial causal order. `Some(Equal)` for identical clocks, `None` when
    /// the clocks diverge.
    fn causal_cmp(&self, other: &VectorClock) -> Option<Ordering> {
        let mut less = false;
        let mut greater = false;

        for participant in self.counters.keys().chain(other.counters.keys()) {
            match self.get(participant).cmp(&other.get(participant)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return None;
            }
        }

        match (less, greater) {
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            _ => Some(Ordering::Equal),
        }
    }
}

/// Free-function form of [`VectorClock::happens_before`].
pub fn happens_before(a: &VectorClock, b: &VectorClock) -> bool {
    a.happens_before(b)
}

/// Free-function form of [`VectorClock::concurrent_with`].
pub fn concurrent(a: &VectorClock, b: &VectorClock) -> bool {
    a.concurrent_with(b)
}

fn validate_participant(participant: &str) -> Result<()> {
    if participant.trim().is_empty() {
        return Err(ChronicleError::new(
            ErrorCode::EmptyParticipant,
            "vector clock participant id must not be empty",
        ));
    }
    Ok(())
}

impl TryFrom<BTreeMap<String, i64>> for VectorClock {
    type Error = ChronicleError;

    fn try_from(map: BTreeMap<String, i64>) -> Result<Self> {
        Self::from_counters(map)
    }
}

impl From<VectorClock> for BTreeMap<String, u64> {
    fn from(clock: VectorClock) -> Self {
        clock.counters
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (participant, value)) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", participant, value)?;
        }
        write!(f, "}}")
    }
}
