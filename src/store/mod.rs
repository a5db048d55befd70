//! Storage backends.
//!
//! Two interchangeable physical backends persist the same logical rows: a
//! flat CSV file ([`FileStore`]) and a SQLite database ([`SqliteStore`]).
//! [`SnapshotStore`] covers the operations common to both; everything
//! backend-specific (file migration, legacy table detection) stays on the
//! concrete types.

pub mod file;
pub mod sqlite;

pub use self::file::FileStore;
pub use self::sqlite::SqliteStore;

use crate::error::Result;
use crate::source::InstanceSnapshot;
use crate::types::{SnapshotRow, Timestamp};

/// Common interface of the physical backends.
pub trait SnapshotStore {
    /// Append one row per snapshot, stamped with the current time.
    ///
    /// Deltas are derived here against the latest stored row of each
    /// snapshot's domain; callers never supply them.
    fn append(&mut self, snapshots: &[InstanceSnapshot]) -> Result<Vec<SnapshotRow>>;

    /// Append one row per snapshot, all stamped with `taken_at`.
    fn append_at(
        &mut self,
        taken_at: Timestamp,
        snapshots: &[InstanceSnapshot],
    ) -> Result<Vec<SnapshotRow>>;

    /// Every stored row, in the backend's canonical order.
    fn rows(&self) -> Result<Vec<SnapshotRow>>;
}
