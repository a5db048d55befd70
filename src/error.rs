//! Error types for the stats store.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store and conversion operations.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Source store not found: {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("Unrecognized schema in {}: {found:?}", path.display())]
    UnknownSchema { path: PathBuf, found: String },

    #[error("Stale schema in {}: migrate the store before converting", path.display())]
    StaleSchema { path: PathBuf },

    #[error("Legacy database layout in {}: run the legacy migration first", path.display())]
    LegacySchema { path: PathBuf },

    #[error("No stats table in {}", path.display())]
    NoSuchTable { path: PathBuf },

    #[error("Duplicate timestamp: {timestamp}")]
    DuplicateTimestamp { timestamp: String },

    #[error("Unparseable timestamp: {text:?}")]
    BadTimestamp { text: String },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StatsError>;
