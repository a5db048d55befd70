//! Flat-file store.
//!
//! One CSV file, first line a schema-bearing header, one row per instance
//! per observation. The file is append-only in normal operation; only a
//! schema migration rewrites it, and that rewrite goes through a temp file
//! in the same directory plus an atomic rename.

use crate::delta::{parse_counter, parse_delta, PreviousValues};
use crate::error::{Result, StatsError};
use crate::schema::{self, FileSchema};
use crate::source::InstanceSnapshot;
use crate::store::SnapshotStore;
use crate::types::{Counts, Deltas, SnapshotRow, Timestamp};
use csv::{ReaderBuilder, StringRecord};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// CSV-backed snapshot store.
///
/// Construction does no IO; the file is created (with a header) on the
/// first append. Appends check the header first and migrate the file in
/// place when it carries an older schema.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema named by the header line.
    ///
    /// `None` for an absent or empty file. A header that matches no known
    /// layout is an [`StatsError::UnknownSchema`] error.
    pub fn detect_schema(&self) -> Result<Option<FileSchema>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .from_path(&self.path)?;
        let mut record = StringRecord::new();
        if !reader.read_record(&mut record)? {
            return Ok(None);
        }
        match FileSchema::detect(&record) {
            Some(found) => Ok(Some(found)),
            None => Err(StatsError::UnknownSchema {
                path: self.path.clone(),
                found: record.iter().collect::<Vec<_>>().join(","),
            }),
        }
    }

    /// Whether the header differs from the current schema.
    ///
    /// An unrecognized header also reports `true`; the subsequent
    /// [`migrate`](Self::migrate) then fails with the details.
    pub fn needs_migration(&self) -> Result<bool> {
        match self.detect_schema() {
            Ok(Some(found)) => Ok(found != FileSchema::CURRENT),
            Ok(None) => Ok(false),
            Err(StatsError::UnknownSchema { .. }) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Rewrite the file to the current schema if its header is older.
    ///
    /// Returns whether a rewrite happened. Raw fields carry over verbatim;
    /// counters the old schema lacked become `0`; the delta block is
    /// recomputed per domain over the rows in file order. The rewrite goes
    /// to a temp file first and replaces the original only after a sync.
    pub fn migrate(&mut self) -> Result<bool> {
        let old_schema = match self.detect_schema()? {
            None => return Ok(false),
            Some(found) if found == FileSchema::CURRENT => return Ok(false),
            Some(found) => found,
        };
        info!(
            "migrating {} from {:?} to {:?}",
            self.path.display(),
            old_schema,
            FileSchema::CURRENT
        );

        let reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(directory)?;
        let mut rows = 0usize;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            writer.write_record(FileSchema::CURRENT.columns())?;
            let mut previous = PreviousValues::new();
            for record in reader.into_records() {
                let record = record?;
                let field = |i: usize| record.get(i).unwrap_or("");
                let domain = field(2).to_string();

                let mut counts = Counts::default();
                for (i, counter) in old_schema.counters().iter().enumerate() {
                    counts.set(*counter, parse_counter(field(schema::FIXED_COLUMNS + i)));
                }
                let deltas = previous.advance(&domain, counts);

                // Raw fields carry over verbatim; only the delta block is
                // rewritten.
                let current = FileSchema::CURRENT;
                let mut fields = Vec::with_capacity(current.width());
                for i in 0..schema::FIXED_COLUMNS {
                    fields.push(field(i).to_string());
                }
                for counter in current.counters() {
                    match old_schema.position_of(*counter) {
                        Some(pos) => fields.push(field(schema::FIXED_COLUMNS + pos).to_string()),
                        None => fields.push("0".to_string()),
                    }
                }
                for counter in current.counters() {
                    fields.push(deltas.get(*counter).to_string());
                }
                writer.write_record(fields)?;
                rows += 1;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| StatsError::Io(e.error))?;
        info!("rewrote {} rows in {}", rows, self.path.display());
        Ok(true)
    }

    /// Lazy iterator over all rows, in file order.
    ///
    /// Restartable: every call re-opens the file. Rows of an older schema
    /// surface in the current shape with the missing counters at 0.
    pub fn iter(&self) -> Result<RowIter> {
        let found = match self.detect_schema()? {
            Some(found) => found,
            None => {
                return Ok(RowIter {
                    schema: FileSchema::CURRENT,
                    records: None,
                })
            }
        };
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        Ok(RowIter {
            schema: found,
            records: Some(reader.into_records()),
        })
    }

    /// Start the file over with just the current-schema header.
    ///
    /// Only called when the file is absent or holds no records yet, so
    /// nothing is lost to the truncation.
    fn write_header(&self) -> Result<()> {
        info!("creating stats file {}", self.path.display());
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(FileSchema::CURRENT.columns())?;
        writer.flush()?;
        Ok(())
    }

    /// Replay the file and collect the last counts per domain.
    ///
    /// Timestamps are not parsed here; a malformed historical row must not
    /// block a write.
    fn scan_previous(&self) -> Result<PreviousValues> {
        let mut previous = PreviousValues::new();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let mut record = StringRecord::new();
        while reader.read_record(&mut record)? {
            let domain = record.get(2).unwrap_or("").to_string();
            let mut counts = Counts::default();
            for (i, counter) in FileSchema::CURRENT.counters().iter().enumerate() {
                let raw = record.get(schema::FIXED_COLUMNS + i).unwrap_or("");
                counts.set(*counter, parse_counter(raw));
            }
            previous.observe(&domain, counts);
        }
        Ok(previous)
    }
}

impl SnapshotStore for FileStore {
    fn append(&mut self, snapshots: &[InstanceSnapshot]) -> Result<Vec<SnapshotRow>> {
        self.append_at(Timestamp::now(), snapshots)
    }

    fn append_at(
        &mut self,
        taken_at: Timestamp,
        snapshots: &[InstanceSnapshot],
    ) -> Result<Vec<SnapshotRow>> {
        match self.detect_schema()? {
            // Absent, or an existing file with no header line yet.
            None => self.write_header()?,
            Some(found) if found != FileSchema::CURRENT => {
                self.migrate()?;
            }
            Some(_) => {}
        }
        let mut previous = self.scan_previous()?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        let mut written = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let deltas = previous.advance(&snapshot.domain, snapshot.counts);
            let row = SnapshotRow {
                timestamp: taken_at,
                name: snapshot.title.clone(),
                domain: snapshot.domain.clone(),
                counts: snapshot.counts,
                deltas,
            };
            writer.write_record(render_row(&row))?;
            written.push(row);
        }
        writer.flush()?;
        debug!("appended {} rows to {}", written.len(), self.path.display());
        Ok(written)
    }

    fn rows(&self) -> Result<Vec<SnapshotRow>> {
        self.iter()?.collect()
    }
}

/// Lazy row iterator returned by [`FileStore::iter`].
pub struct RowIter {
    schema: FileSchema,
    records: Option<csv::StringRecordsIntoIter<std::fs::File>>,
}

impl Iterator for RowIter {
    type Item = Result<SnapshotRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let records = self.records.as_mut()?;
        match records.next()? {
            Ok(record) => Some(parse_row(self.schema, &record)),
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Render a row as current-schema CSV fields.
pub(crate) fn render_row(row: &SnapshotRow) -> Vec<String> {
    let current = FileSchema::CURRENT;
    let mut fields = Vec::with_capacity(current.width());
    fields.push(row.timestamp.format_with(schema::FILE_TIME_SEPARATOR));
    fields.push(row.name.clone());
    fields.push(row.domain.clone());
    for counter in current.counters() {
        fields.push(row.counts.get(*counter).to_string());
    }
    for counter in current.counters() {
        fields.push(row.deltas.get(*counter).to_string());
    }
    fields
}

fn parse_row(file_schema: FileSchema, record: &StringRecord) -> Result<SnapshotRow> {
    let field = |i: usize| record.get(i).unwrap_or("");
    let raw_timestamp = field(0);
    let timestamp = Timestamp::parse_with(raw_timestamp, schema::FILE_TIME_SEPARATOR).ok_or_else(
        || StatsError::BadTimestamp {
            text: raw_timestamp.to_string(),
        },
    )?;
    let counters = file_schema.counters();
    let mut counts = Counts::default();
    let mut deltas = Deltas::default();
    for (i, counter) in counters.iter().enumerate() {
        counts.set(*counter, parse_counter(field(schema::FIXED_COLUMNS + i)));
        deltas.set(
            *counter,
            parse_delta(field(schema::FIXED_COLUMNS + counters.len() + i)),
        );
    }
    Ok(SnapshotRow {
        timestamp,
        name: field(1).to_string(),
        domain: field(2).to_string(),
        counts,
        deltas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(domain: &str, title: &str, counts: Counts) -> InstanceSnapshot {
        InstanceSnapshot::new(domain, title, counts)
    }

    fn counts(users: u64, active_users: u64, toots: u64, connections: u64) -> Counts {
        Counts {
            users,
            active_users,
            toots,
            connections,
        }
    }

    fn ts(text: &str) -> Timestamp {
        Timestamp::parse_with(text, ' ').unwrap()
    }

    #[test]
    fn test_first_append_creates_file_with_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        let mut store = FileStore::new(&path);
        store
            .append_at(
                ts("2024-03-01 10:00:00"),
                &[snapshot("example.social", "Example", counts(100, 40, 50, 10))],
            )
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let header = content.lines().next().unwrap();
        assert_eq!(header, FileSchema::CURRENT.columns().join(","));
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_first_row_deltas_equal_raw_values() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::new(dir.path().join("stats.csv"));
        let written = store
            .append_at(
                ts("2024-03-01 10:00:00"),
                &[snapshot("example.social", "Example", counts(100, 40, 50, 10))],
            )
            .unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].deltas.users, 100);
        assert_eq!(written[0].deltas.toots, 50);
        assert_eq!(written[0].deltas.connections, 10);
    }

    #[test]
    fn test_deltas_survive_reopening_the_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        FileStore::new(&path)
            .append_at(
                ts("2024-03-01 10:00:00"),
                &[snapshot("example.social", "Example", counts(100, 40, 50, 10))],
            )
            .unwrap();

        // A fresh instance has no in-memory state; it must rescan the file.
        let written = FileStore::new(&path)
            .append_at(
                ts("2024-03-02 10:00:00"),
                &[snapshot("example.social", "Example", counts(120, 44, 55, 12))],
            )
            .unwrap();
        assert_eq!(written[0].deltas.users, 20);
        assert_eq!(written[0].deltas.active_users, 4);
        assert_eq!(written[0].deltas.toots, 5);
        assert_eq!(written[0].deltas.connections, 2);
    }

    #[test]
    fn test_duplicate_timestamps_are_tolerated() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::new(dir.path().join("stats.csv"));
        let stamp = ts("2024-03-01 10:00:00");
        store
            .append_at(stamp, &[snapshot("example.social", "Example", counts(1, 1, 1, 1))])
            .unwrap();
        store
            .append_at(stamp, &[snapshot("example.social", "Example", counts(2, 2, 2, 2))])
            .unwrap();

        let rows = store.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, rows[1].timestamp);
        assert_eq!(rows[1].deltas.users, 1);
    }

    #[test]
    fn test_malformed_counter_reads_as_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        let header = FileSchema::CURRENT.columns().join(",");
        std::fs::write(
            &path,
            format!("{header}\n2024-03-01Z10:00:00.000000,Example,example.social,abc,40,50,10,0,40,50,10\n"),
        )
        .unwrap();

        let rows = FileStore::new(&path).rows().unwrap();
        assert_eq!(rows[0].counts.users, 0);
        assert_eq!(rows[0].counts.active_users, 40);

        // The next append diffs against 0, not against a parse failure.
        let written = FileStore::new(&path)
            .append_at(
                ts("2024-03-02 10:00:00"),
                &[snapshot("example.social", "Example", counts(100, 41, 51, 11))],
            )
            .unwrap();
        assert_eq!(written[0].deltas.users, 100);
        assert_eq!(written[0].deltas.active_users, 1);
    }

    #[test]
    fn test_bad_timestamp_is_fatal_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        let header = FileSchema::CURRENT.columns().join(",");
        std::fs::write(
            &path,
            format!("{header}\nyesterday,Example,example.social,1,1,1,1,1,1,1,1\n"),
        )
        .unwrap();

        let result = FileStore::new(&path).rows();
        assert!(matches!(result, Err(StatsError::BadTimestamp { .. })));
    }

    #[test]
    fn test_iter_on_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("nope.csv"));
        assert_eq!(store.rows().unwrap().len(), 0);
        assert!(!store.needs_migration().unwrap());
    }

    #[test]
    fn test_append_to_empty_file_writes_the_header_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        // A zero-byte file, as `touch` leaves behind.
        std::fs::write(&path, "").unwrap();

        let mut store = FileStore::new(&path);
        store
            .append_at(
                ts("2024-03-01 10:00:00"),
                &[snapshot("example.social", "Example", counts(100, 40, 50, 10))],
            )
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            FileSchema::CURRENT.columns().join(",")
        );
        assert_eq!(store.rows().unwrap().len(), 1);

        // The history stays readable for the next append.
        let written = store
            .append_at(
                ts("2024-03-02 10:00:00"),
                &[snapshot("example.social", "Example", counts(120, 44, 55, 12))],
            )
            .unwrap();
        assert_eq!(written[0].deltas.users, 20);
    }

    #[test]
    fn test_unknown_header_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.csv");
        std::fs::write(&path, "What,Is,This\n1,2,3\n").unwrap();

        let mut store = FileStore::new(&path);
        assert!(store.needs_migration().unwrap());
        assert!(matches!(
            store.migrate(),
            Err(StatsError::UnknownSchema { .. })
        ));
        // Nothing was rewritten.
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "What,Is,This\n1,2,3\n"
        );
    }
}
