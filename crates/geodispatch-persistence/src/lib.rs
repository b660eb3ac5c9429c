mod atomic;
mod checkpoint;
mod dataset;
mod results;

pub use checkpoint::CheckpointFile;
pub use dataset::Dataset;
pub use results::ResultsFile;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Row {row} has {found} cells but the header has {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("Row {0} is out of range")]
    RowOutOfRange(usize),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Output column holding the latitude
pub const LATITUDE_COLUMN: &str = "latitude";

/// Output column holding the longitude
pub const LONGITUDE_COLUMN: &str = "longitude";
