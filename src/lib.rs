//! # Instance Stats
//!
//! An append-only time-series store for fediverse instance statistics:
//! periodic counter snapshots (users, active users, toots, connections) per
//! instance, with write-time deltas against the previous snapshot of the
//! same domain.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: One observation of an instance's counters, keyed by domain
//! - **Deltas**: Derived at write time, never supplied by callers
//! - **Backends**: A flat CSV file and a SQLite database, interchangeable
//!   and convertible in both directions without loss
//! - **Schema migration**: Old files and tables are upgraded in place, new
//!   counters backfilled with 0
//!
//! ## Example
//!
//! ```ignore
//! use instance_stats::{FileStore, InstanceSnapshot, SnapshotStore};
//!
//! let mut store = FileStore::new("./stats.csv");
//! let snapshot = InstanceSnapshot::from_api_json("example.social", &payload);
//! let written = store.append(&[snapshot])?;
//!
//! // Move the history into a database.
//! instance_stats::csv_to_sqlite("./stats.csv", "./stats.db")?;
//! ```

pub mod convert;
pub mod delta;
pub mod error;
pub mod schema;
pub mod source;
pub mod store;
pub mod types;

// Re-exports
pub use convert::{csv_to_sqlite, migrate_legacy_db, sqlite_to_csv, LegacyDbMigration};
pub use delta::{compute_deltas, parse_counter, parse_delta, PreviousValues};
pub use error::{Result, StatsError};
pub use schema::FileSchema;
pub use source::InstanceSnapshot;
pub use store::{FileStore, SnapshotStore, SqliteStore};
pub use types::*;
