//! Delta derivation between consecutive snapshots of the same domain.
//!
//! Deltas are always derived at write time from the previous stored row of
//! the *same* domain; they are never supplied by callers. A domain with no
//! prior row gets its raw values as deltas, so the first row of a series is
//! self-describing.

use crate::types::{Counter, Counts, Deltas};
use std::collections::HashMap;

/// Difference of `current` against `previous`, per counter.
///
/// With no previous row the raw values are returned as deltas.
pub fn compute_deltas(current: &Counts, previous: Option<&Counts>) -> Deltas {
    let mut deltas = Deltas::default();
    for counter in Counter::ALL {
        let cur = signed(current.get(counter));
        let delta = match previous {
            Some(prev) => cur - signed(prev.get(counter)),
            None => cur,
        };
        deltas.set(counter, delta);
    }
    deltas
}

/// Clamp a raw counter into the signed range deltas and the database use.
pub(crate) fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Parse a stored counter value.
///
/// Malformed historical rows must not abort a write, so anything that does
/// not parse as an unsigned integer counts as 0.
pub fn parse_counter(text: &str) -> u64 {
    text.trim().parse().unwrap_or(0)
}

/// Parse a stored delta value, with the same tolerance as [`parse_counter`].
pub fn parse_delta(text: &str) -> i64 {
    text.trim().parse().unwrap_or(0)
}

/// Last-seen counter values, keyed by domain.
///
/// Backends replay stored rows through this map before appending, so each
/// new row diffs against the latest row of its own domain and domains never
/// contaminate each other.
#[derive(Clone, Debug, Default)]
pub struct PreviousValues {
    last: HashMap<String, Counts>,
}

impl PreviousValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the counts of a row as the latest for its domain.
    pub fn observe(&mut self, domain: &str, counts: Counts) {
        self.last.insert(domain.to_string(), counts);
    }

    /// Latest observed counts for a domain, if any.
    pub fn get(&self, domain: &str) -> Option<&Counts> {
        self.last.get(domain)
    }

    /// Derive deltas for the next row of `domain` and advance the map.
    pub fn advance(&mut self, domain: &str, current: Counts) -> Deltas {
        let deltas = compute_deltas(&current, self.get(domain));
        self.observe(domain, current);
        deltas
    }
}
