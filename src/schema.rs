//! Versioned storage schemas.
//!
//! Both backends share one logical row layout: timestamp, instance name,
//! domain, then the raw counters in a fixed order, then their deltas in the
//! same order. The flat file spells the layout out in its header line; the
//! database spells it out in the `data` table.
//!
//! Schema history:
//! - v1: users, toots, connections
//! - v2 (current): adds active users between users and toots

use crate::types::Counter;

/// Leading columns before the counter block: timestamp, name, domain.
pub const FIXED_COLUMNS: usize = 3;

/// Date/time separator used in the flat file.
pub const FILE_TIME_SEPARATOR: char = 'Z';

/// Date/time separator used in the database.
pub const DB_TIME_SEPARATOR: char = ' ';

const COLUMNS_V1: [&str; 9] = [
    "Date and time",
    "Instance name",
    "Domain",
    "Users",
    "Toots",
    "Connections",
    "DUsers",
    "DToots",
    "DConnections",
];

const COLUMNS_V2: [&str; 11] = [
    "Date and time",
    "Instance name",
    "Domain",
    "Users",
    "Active users",
    "Toots",
    "Connections",
    "DUsers",
    "DActive users",
    "DToots",
    "DConnections",
];

const COUNTERS_V1: [Counter; 3] = [Counter::Users, Counter::Toots, Counter::Connections];

/// A recognized flat-file header layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileSchema {
    V1,
    V2,
}

impl FileSchema {
    /// The schema every write produces.
    pub const CURRENT: FileSchema = FileSchema::V2;

    /// Ordered column names, exactly as they appear in the header line.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            FileSchema::V1 => &COLUMNS_V1,
            FileSchema::V2 => &COLUMNS_V2,
        }
    }

    /// Counters present in this schema, in column order.
    pub fn counters(self) -> &'static [Counter] {
        match self {
            FileSchema::V1 => &COUNTERS_V1,
            FileSchema::V2 => &Counter::ALL,
        }
    }

    /// Total column count.
    pub fn width(self) -> usize {
        self.columns().len()
    }

    /// Index of a counter within this schema's counter block, if present.
    pub fn position_of(self, counter: Counter) -> Option<usize> {
        self.counters().iter().position(|c| *c == counter)
    }

    /// Match a header record against the known layouts.
    pub fn detect(header: &csv::StringRecord) -> Option<FileSchema> {
        [FileSchema::V2, FileSchema::V1].into_iter().find(|schema| {
            let columns = schema.columns();
            header.len() == columns.len()
                && header.iter().zip(columns.iter()).all(|(got, want)| got == *want)
        })
    }
}

// --- Database schema ---

/// Name of the stats table.
pub const TABLE: &str = "data";

/// Column definitions of the current table, shared by table creation and the
/// legacy rebuild.
pub const TABLE_BODY_SQL: &str = "(
    date_and_time DATETIME PRIMARY KEY,
    instance_name TEXT,
    domain TEXT,
    users INTEGER,
    active_users INTEGER,
    toots INTEGER,
    connections INTEGER,
    d_users INTEGER,
    d_active_users INTEGER,
    d_toots INTEGER,
    d_connections INTEGER
)";

/// `SELECT` prefix fetching every column in row order.
pub const SELECT_SQL: &str = "SELECT date_and_time, instance_name, domain, \
     users, active_users, toots, connections, \
     d_users, d_active_users, d_toots, d_connections FROM data";

/// Parameterized insert of one full row.
pub const INSERT_SQL: &str = "INSERT INTO data (date_and_time, instance_name, domain, \
     users, active_users, toots, connections, \
     d_users, d_active_users, d_toots, d_connections) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

/// Columns of the current table, in row order.
pub const DB_COLUMNS: [&str; 11] = [
    "date_and_time",
    "instance_name",
    "domain",
    "users",
    "active_users",
    "toots",
    "connections",
    "d_users",
    "d_active_users",
    "d_toots",
    "d_connections",
];

/// Columns a pre-migration database is expected to carry.
pub const LEGACY_DB_COLUMNS: [&str; 9] = [
    "date_and_time",
    "instance_name",
    "domain",
    "users",
    "toots",
    "connections",
    "d_users",
    "d_toots",
    "d_connections",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn header(columns: &[&str]) -> csv::StringRecord {
        csv::StringRecord::from(columns.to_vec())
    }

    #[test]
    fn test_detect_current_schema() {
        let record = header(FileSchema::V2.columns());
        assert_eq!(FileSchema::detect(&record), Some(FileSchema::V2));
    }

    #[test]
    fn test_detect_v1_schema() {
        let record = header(FileSchema::V1.columns());
        assert_eq!(FileSchema::detect(&record), Some(FileSchema::V1));
    }

    #[test]
    fn test_detect_rejects_unknown_header() {
        assert_eq!(FileSchema::detect(&header(&["Date", "Users"])), None);
        let mut truncated = FileSchema::V2.columns().to_vec();
        truncated.pop();
        assert_eq!(FileSchema::detect(&header(&truncated)), None);
    }

    #[test]
    fn test_columns_follow_counter_names() {
        for schema in [FileSchema::V1, FileSchema::V2] {
            let columns = schema.columns();
            let counters = schema.counters();
            assert_eq!(columns.len(), FIXED_COLUMNS + 2 * counters.len());
            for (i, counter) in counters.iter().enumerate() {
                assert_eq!(columns[FIXED_COLUMNS + i], counter.column_name());
                assert_eq!(
                    columns[FIXED_COLUMNS + counters.len() + i],
                    counter.delta_column_name()
                );
            }
        }
    }

    #[test]
    fn test_position_of_counter() {
        assert_eq!(FileSchema::V1.position_of(Counter::ActiveUsers), None);
        assert_eq!(FileSchema::V1.position_of(Counter::Toots), Some(1));
        assert_eq!(FileSchema::V2.position_of(Counter::ActiveUsers), Some(1));
    }

    #[test]
    fn test_select_and_insert_cover_all_columns() {
        for counter in Counter::ALL {
            assert!(SELECT_SQL.contains(counter.sql_name()));
            assert!(INSERT_SQL.contains(counter.sql_delta_name()));
            assert!(TABLE_BODY_SQL.contains(counter.sql_name()));
        }
        assert!(INSERT_SQL.contains("?11"));
        for column in DB_COLUMNS {
            assert!(TABLE_BODY_SQL.contains(column));
            assert!(SELECT_SQL.contains(column));
        }
        assert_eq!(DB_COLUMNS.len(), LEGACY_DB_COLUMNS.len() + 2);
    }
}
