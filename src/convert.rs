//! Conversions between the two backends, and the legacy database rebuild.
//!
//! Conversion is a verbatim copy: rows keep their timestamps, counters and
//! deltas bit-for-bit, only the physical encoding changes. Nothing is
//! recomputed, so converting back yields the original data set.

use crate::error::{Result, StatsError};
use crate::schema::{self, FileSchema};
use crate::store::file::{render_row, FileStore};
use crate::store::sqlite::{column_names, table_exists, SqliteStore};
use crate::store::SnapshotStore;
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Import every row of a stats file into a database.
///
/// The file must exist and carry the current schema; the database is
/// created as needed. Returns the number of imported rows.
pub fn csv_to_sqlite(csv_path: impl AsRef<Path>, db_path: impl AsRef<Path>) -> Result<usize> {
    let csv_path = csv_path.as_ref();
    if !csv_path.exists() {
        return Err(StatsError::SourceMissing {
            path: csv_path.to_path_buf(),
        });
    }
    let source = FileStore::new(csv_path);
    match source.detect_schema()? {
        None => {
            // Exists but has no header line.
            return Err(StatsError::UnknownSchema {
                path: csv_path.to_path_buf(),
                found: String::new(),
            });
        }
        Some(found) if found != FileSchema::CURRENT => {
            return Err(StatsError::StaleSchema {
                path: csv_path.to_path_buf(),
            });
        }
        Some(_) => {}
    }

    let destination = SqliteStore::open(db_path)?;
    if destination.needs_migration()? {
        return Err(StatsError::LegacySchema {
            path: destination.path().to_path_buf(),
        });
    }
    let mut imported = 0usize;
    for row in source.iter()? {
        destination.insert_row(&row?)?;
        imported += 1;
    }
    info!(
        "imported {} rows from {} into {}",
        imported,
        csv_path.display(),
        destination.path().display()
    );
    Ok(imported)
}

/// Export every row of a database into a stats file, in timestamp order.
///
/// The database must exist and carry the stats table. The file is written
/// from scratch with a current-schema header. Returns the number of
/// exported rows.
pub fn sqlite_to_csv(db_path: impl AsRef<Path>, csv_path: impl AsRef<Path>) -> Result<usize> {
    let db_path = db_path.as_ref();
    let csv_path = csv_path.as_ref();
    let source = SqliteStore::open_existing(db_path)?;
    if source.needs_migration()? {
        return Err(StatsError::LegacySchema {
            path: db_path.to_path_buf(),
        });
    }
    // Read everything before touching the output file.
    let rows = source.rows()?;

    let mut writer = csv::Writer::from_path(csv_path)?;
    writer.write_record(FileSchema::CURRENT.columns())?;
    for row in &rows {
        writer.write_record(render_row(row))?;
    }
    writer.flush()?;
    info!(
        "exported {} rows from {} to {}",
        rows.len(),
        db_path.display(),
        csv_path.display()
    );
    Ok(rows.len())
}

/// Outcome of [`migrate_legacy_db`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LegacyDbMigration {
    /// The table already carries the active-users columns; nothing was
    /// touched.
    AlreadyCurrent,
    /// The table was rebuilt; this many rows made it across.
    Migrated { rows: usize },
}

/// Rebuild a legacy stats table into the current layout.
///
/// Copies every legacy column, fills `active_users` and `d_active_users`
/// with 0 and re-declares the timestamp primary key. The whole rebuild runs
/// in one transaction, and running it again is a no-op.
pub fn migrate_legacy_db(db_path: impl AsRef<Path>) -> Result<LegacyDbMigration> {
    let db_path = db_path.as_ref();
    if !db_path.exists() {
        return Err(StatsError::SourceMissing {
            path: db_path.to_path_buf(),
        });
    }
    let mut conn = Connection::open(db_path)?;
    if !table_exists(&conn)? {
        return Err(StatsError::NoSuchTable {
            path: db_path.to_path_buf(),
        });
    }
    let names = column_names(&conn)?;
    let has = |column: &str| names.iter().any(|name| name == column);
    if schema::DB_COLUMNS.iter().all(|column| has(column)) {
        info!("{} already uses the current table layout", db_path.display());
        return Ok(LegacyDbMigration::AlreadyCurrent);
    }
    // Half-upgraded or foreign layouts are not rebuilt over.
    if has("active_users") || !schema::LEGACY_DB_COLUMNS.iter().all(|column| has(column)) {
        return Err(StatsError::UnknownSchema {
            path: db_path.to_path_buf(),
            found: names.join(","),
        });
    }

    let rows: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", schema::TABLE),
        [],
        |row| row.get(0),
    )?;
    let tx = conn.transaction()?;
    tx.execute_batch(&legacy_rebuild_sql())?;
    tx.commit()?;
    info!(
        "migrated {} rows in {} to the current table layout",
        rows,
        db_path.display()
    );
    Ok(LegacyDbMigration::Migrated { rows: rows as usize })
}

/// The rebuild goes through a scratch table so the timestamp primary key
/// can be re-declared on the final table.
fn legacy_rebuild_sql() -> String {
    format!(
        "CREATE TABLE temp_table AS SELECT
            date_and_time,
            instance_name,
            domain,
            users,
            0 AS active_users,
            toots,
            connections,
            d_users,
            0 AS d_active_users,
            d_toots,
            d_connections
        FROM {table};
        DROP TABLE {table};
        CREATE TABLE {table} {body};
        INSERT INTO {table} SELECT * FROM temp_table;
        DROP TABLE temp_table;",
        table = schema::TABLE,
        body = schema::TABLE_BODY_SQL,
    )
}
