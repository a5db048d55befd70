//! Core types for the stats store.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;

/// One tracked counter of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    Users,
    ActiveUsers,
    Toots,
    Connections,
}

impl Counter {
    /// All counters, in column order.
    pub const ALL: [Counter; 4] = [
        Counter::Users,
        Counter::ActiveUsers,
        Counter::Toots,
        Counter::Connections,
    ];

    /// Flat-file column name for the raw value.
    pub fn column_name(self) -> &'static str {
        match self {
            Counter::Users => "Users",
            Counter::ActiveUsers => "Active users",
            Counter::Toots => "Toots",
            Counter::Connections => "Connections",
        }
    }

    /// Flat-file column name for the derived delta.
    pub fn delta_column_name(self) -> &'static str {
        match self {
            Counter::Users => "DUsers",
            Counter::ActiveUsers => "DActive users",
            Counter::Toots => "DToots",
            Counter::Connections => "DConnections",
        }
    }

    /// Database column name for the raw value.
    pub fn sql_name(self) -> &'static str {
        match self {
            Counter::Users => "users",
            Counter::ActiveUsers => "active_users",
            Counter::Toots => "toots",
            Counter::Connections => "connections",
        }
    }

    /// Database column name for the derived delta.
    pub fn sql_delta_name(self) -> &'static str {
        match self {
            Counter::Users => "d_users",
            Counter::ActiveUsers => "d_active_users",
            Counter::Toots => "d_toots",
            Counter::Connections => "d_connections",
        }
    }
}

/// Raw counter values of one instance at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub users: u64,
    pub active_users: u64,
    pub toots: u64,
    pub connections: u64,
}

impl Counts {
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Users => self.users,
            Counter::ActiveUsers => self.active_users,
            Counter::Toots => self.toots,
            Counter::Connections => self.connections,
        }
    }

    pub fn set(&mut self, counter: Counter, value: u64) {
        match counter {
            Counter::Users => self.users = value,
            Counter::ActiveUsers => self.active_users = value,
            Counter::Toots => self.toots = value,
            Counter::Connections => self.connections = value,
        }
    }
}

/// Signed per-counter differences against the previous row of the same domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deltas {
    pub users: i64,
    pub active_users: i64,
    pub toots: i64,
    pub connections: i64,
}

impl Deltas {
    pub fn get(&self, counter: Counter) -> i64 {
        match counter {
            Counter::Users => self.users,
            Counter::ActiveUsers => self.active_users,
            Counter::Toots => self.toots,
            Counter::Connections => self.connections,
        }
    }

    pub fn set(&mut self, counter: Counter, value: i64) {
        match counter {
            Counter::Users => self.users = value,
            Counter::ActiveUsers => self.active_users = value,
            Counter::Toots => self.toots = value,
            Counter::Connections => self.connections = value,
        }
    }
}

/// UTC wall-clock time of a snapshot, microsecond precision.
///
/// Rendered as `YYYY-MM-DD<sep>HH:MM:SS.ffffff` where the separator differs
/// per backend. Parsing tolerates a missing fractional part; writing always
/// emits six digits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub NaiveDateTime);

impl Timestamp {
    /// Current time, truncated to whole microseconds so it round-trips
    /// through the textual formats unchanged.
    pub fn now() -> Self {
        let micros = Utc::now().timestamp_micros();
        let dt = DateTime::from_timestamp_micros(micros)
            .expect("current time out of range")
            .naive_utc();
        Timestamp(dt)
    }

    /// Render with the given date/time separator.
    pub fn format_with(self, separator: char) -> String {
        format!(
            "{}{}{}",
            self.0.format("%Y-%m-%d"),
            separator,
            self.0.format("%H:%M:%S%.6f")
        )
    }

    /// Parse a timestamp rendered with the given separator.
    ///
    /// The fractional part is optional, so rows written by older versions
    /// (whole-second precision) still parse.
    pub fn parse_with(text: &str, separator: char) -> Option<Self> {
        let (date, time) = text.split_once(separator)?;
        let composed = format!("{date} {time}");
        NaiveDateTime::parse_from_str(&composed, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(&composed, "%Y-%m-%d %H:%M:%S"))
            .ok()
            .map(Timestamp)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One stored row: raw counters plus derived deltas for a single instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRow {
    /// When the snapshot was taken.
    pub timestamp: Timestamp,

    /// Human-readable instance name ("Mastodon" etc.).
    pub name: String,

    /// Instance domain, the identity rows are keyed on.
    pub domain: String,

    /// Raw counter values.
    pub counts: Counts,

    /// Differences against the previous row of the same domain.
    pub deltas: Deltas,
}
