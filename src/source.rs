//! Instance snapshot inputs.
//!
//! The store never fetches anything itself. Callers collect instance API
//! payloads however they like and hand them over as [`InstanceSnapshot`]s,
//! one per domain. [`InstanceSnapshot::from_api_json`] adapts the common
//! payload shape: the classic `stats` block for users/toots/connections and
//! the newer `usage.users.active_month` field for active users.

use crate::delta::parse_counter;
use crate::types::Counts;
use serde::Deserialize;
use serde_json::Value;

/// A single instance observation, ready to be appended to a store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceSnapshot {
    /// Domain the observation is keyed on.
    pub domain: String,

    /// Human-readable instance name.
    pub title: String,

    /// Raw counter values at observation time.
    pub counts: Counts,
}

impl InstanceSnapshot {
    pub fn new(domain: impl Into<String>, title: impl Into<String>, counts: Counts) -> Self {
        Self {
            domain: domain.into(),
            title: title.into(),
            counts,
        }
    }

    /// Build a snapshot from an instance API payload.
    ///
    /// Never errors on shape: absent or malformed fields count as 0 and a
    /// missing title falls back to the domain.
    pub fn from_api_json(domain: &str, payload: &Value) -> Self {
        let parsed: ApiPayload = serde_json::from_value(payload.clone()).unwrap_or_default();
        let counts = Counts {
            users: counter_value(&parsed.stats.user_count),
            active_users: counter_value(&parsed.usage.users.active_month),
            toots: counter_value(&parsed.stats.status_count),
            connections: counter_value(&parsed.stats.domain_count),
        };
        let title = parsed
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| domain.to_string());
        Self {
            domain: domain.to_string(),
            title,
            counts,
        }
    }
}

/// Tolerant mirror of the instance API payload. Every field is optional;
/// unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct ApiPayload {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    stats: ApiStats,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Default, Deserialize)]
struct ApiStats {
    #[serde(default)]
    user_count: Value,
    #[serde(default)]
    status_count: Value,
    #[serde(default)]
    domain_count: Value,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    users: ApiUsageUsers,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsageUsers {
    #[serde(default)]
    active_month: Value,
}

fn counter_value(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| if f < 0.0 { 0 } else { f as u64 }))
            .unwrap_or(0),
        Value::String(s) => parse_counter(s),
        _ => 0,
    }
}
