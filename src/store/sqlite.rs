//! SQLite store.
//!
//! One `data` table keyed on the timestamp, one row per instance per
//! observation. Unlike the flat file, the previous counter values for delta
//! derivation come from a query instead of a replay, and a legacy table
//! layout is refused rather than migrated on the fly (see
//! [`crate::convert::migrate_legacy_db`]).

use crate::delta::{compute_deltas, parse_counter, parse_delta, signed};
use crate::error::{Result, StatsError};
use crate::schema;
use crate::source::InstanceSnapshot;
use crate::store::SnapshotStore;
use crate::types::{Counter, Counts, Deltas, SnapshotRow, Timestamp};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// SQLite-backed snapshot store.
pub struct SqliteStore {
    path: PathBuf,
    conn: Connection,
}

impl SqliteStore {
    /// Open a database, creating the file and the stats table as needed.
    ///
    /// An existing legacy table is left untouched;
    /// [`needs_migration`](Self::needs_migration) reports it and appends
    /// refuse to write through it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let store = Self { path, conn };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Open a database that must already exist and carry the stats table.
    ///
    /// Used where creating an empty store would mask a caller mistake, such
    /// as the source side of a conversion.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StatsError::SourceMissing { path });
        }
        let conn = Connection::open(&path)?;
        if !table_exists(&conn)? {
            return Err(StatsError::NoSuchTable { path });
        }
        Ok(Self { path, conn })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            path: PathBuf::from(":memory:"),
            conn,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} {};",
            schema::TABLE,
            schema::TABLE_BODY_SQL
        ))?;
        Ok(())
    }

    /// Whether the table predates the active-users columns.
    pub fn needs_migration(&self) -> Result<bool> {
        Ok(table_exists(&self.conn)? && !has_column(&self.conn, "active_users")?)
    }

    fn check_schema(&self) -> Result<()> {
        if self.needs_migration()? {
            warn!("{} still uses the legacy table layout", self.path.display());
            return Err(StatsError::LegacySchema {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Latest row overall, by timestamp.
    pub fn most_recent(&self) -> Result<Option<SnapshotRow>> {
        self.check_schema()?;
        let sql = format!("{} ORDER BY date_and_time DESC LIMIT 1", schema::SELECT_SQL);
        let raw = self.conn.query_row(&sql, [], read_raw).optional()?;
        raw.map(finish_row).transpose()
    }

    /// Latest row of one domain, by timestamp.
    pub fn most_recent_for(&self, domain: &str) -> Result<Option<SnapshotRow>> {
        self.check_schema()?;
        let sql = format!(
            "{} WHERE domain = ?1 ORDER BY date_and_time DESC LIMIT 1",
            schema::SELECT_SQL
        );
        let raw = self
            .conn
            .query_row(&sql, params![domain], read_raw)
            .optional()?;
        raw.map(finish_row).transpose()
    }

    /// Insert a fully-formed row, deltas included.
    ///
    /// The append path and the bulk import both end up here; a primary key
    /// clash surfaces as [`StatsError::DuplicateTimestamp`].
    pub(crate) fn insert_row(&self, row: &SnapshotRow) -> Result<()> {
        let timestamp = row.timestamp.format_with(schema::DB_TIME_SEPARATOR);
        let result = self.conn.execute(
            schema::INSERT_SQL,
            params![
                timestamp,
                row.name,
                row.domain,
                signed(row.counts.users),
                signed(row.counts.active_users),
                signed(row.counts.toots),
                signed(row.counts.connections),
                row.deltas.users,
                row.deltas.active_users,
                row.deltas.toots,
                row.deltas.connections,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                warn!("row at {} already exists in {}", timestamp, self.path.display());
                Err(StatsError::DuplicateTimestamp { timestamp })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn append_with(
        &mut self,
        snapshots: &[InstanceSnapshot],
        mut stamp: impl FnMut() -> Timestamp,
    ) -> Result<Vec<SnapshotRow>> {
        self.check_schema()?;
        let mut written = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let previous = self.most_recent_for(&snapshot.domain)?;
            let deltas = compute_deltas(&snapshot.counts, previous.as_ref().map(|row| &row.counts));
            let row = SnapshotRow {
                timestamp: stamp(),
                name: snapshot.title.clone(),
                domain: snapshot.domain.clone(),
                counts: snapshot.counts,
                deltas,
            };
            self.insert_row(&row)?;
            written.push(row);
        }
        debug!("appended {} rows to {}", written.len(), self.path.display());
        Ok(written)
    }
}

impl SnapshotStore for SqliteStore {
    fn append(&mut self, snapshots: &[InstanceSnapshot]) -> Result<Vec<SnapshotRow>> {
        // Fresh stamp per row; the timestamp is the primary key.
        self.append_with(snapshots, Timestamp::now)
    }

    fn append_at(
        &mut self,
        taken_at: Timestamp,
        snapshots: &[InstanceSnapshot],
    ) -> Result<Vec<SnapshotRow>> {
        self.append_with(snapshots, move || taken_at)
    }

    fn rows(&self) -> Result<Vec<SnapshotRow>> {
        self.check_schema()?;
        let sql = format!("{} ORDER BY date_and_time", schema::SELECT_SQL);
        let mut stmt = self.conn.prepare(&sql)?;
        let raw_rows = stmt.query_map([], read_raw)?;
        let mut rows = Vec::new();
        for raw in raw_rows {
            rows.push(finish_row(raw?)?);
        }
        Ok(rows)
    }
}

// --- Schema introspection, shared with the conversion utilities ---

pub(crate) fn table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![schema::TABLE],
        |row| row.get(0),
    )
}

pub(crate) fn has_column(conn: &Connection, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('{}') WHERE name = ?1",
            schema::TABLE
        ),
        params![column],
        |row| row.get(0),
    )
}

pub(crate) fn column_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name FROM pragma_table_info('{}')",
        schema::TABLE
    ))?;
    let names = stmt.query_map([], |row| row.get(0))?;
    names.collect()
}

// --- Row mapping ---

type RawRow = (String, String, String, Counts, Deltas);

fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    let timestamp: String = row.get(0)?;
    let name: String = row.get(1)?;
    let domain: String = row.get(2)?;
    let mut counts = Counts::default();
    let mut deltas = Deltas::default();
    for (i, counter) in Counter::ALL.iter().enumerate() {
        counts.set(
            *counter,
            counter_from_ref(row.get_ref(schema::FIXED_COLUMNS + i)?),
        );
        deltas.set(
            *counter,
            delta_from_ref(row.get_ref(schema::FIXED_COLUMNS + Counter::ALL.len() + i)?),
        );
    }
    Ok((timestamp, name, domain, counts, deltas))
}

fn finish_row(raw: RawRow) -> Result<SnapshotRow> {
    let (timestamp, name, domain, counts, deltas) = raw;
    match Timestamp::parse_with(&timestamp, schema::DB_TIME_SEPARATOR) {
        Some(parsed) => Ok(SnapshotRow {
            timestamp: parsed,
            name,
            domain,
            counts,
            deltas,
        }),
        None => Err(StatsError::BadTimestamp { text: timestamp }),
    }
}

/// Stored counters are fail-soft like their flat-file counterparts: whatever
/// does not read as a non-negative number counts as 0.
fn counter_from_ref(value: ValueRef<'_>) -> u64 {
    match value {
        ValueRef::Integer(i) => i.max(0) as u64,
        ValueRef::Real(f) => f as u64,
        ValueRef::Text(bytes) => parse_counter(std::str::from_utf8(bytes).unwrap_or("")),
        _ => 0,
    }
}

fn delta_from_ref(value: ValueRef<'_>) -> i64 {
    match value {
        ValueRef::Integer(i) => i,
        ValueRef::Real(f) => f as i64,
        ValueRef::Text(bytes) => parse_delta(std::str::from_utf8(bytes).unwrap_or("")),
        _ => 0,
    }
}
