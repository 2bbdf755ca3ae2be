use record::RecordError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, opening or reading an SSTable.
#[derive(Debug, Error)]
pub enum SsTableError {
    /// One of the table's files could not be created or opened.
    #[error("failed to initialize {kind} file {}: {source}", path.display())]
    FileInit {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("record error: {0}")]
    Record(#[from] RecordError),

    #[error("refusing to write an empty sstable")]
    Empty,

    /// Input to the writer was not strictly ascending by key.
    #[error("records out of order: {prev:?} followed by {next:?}")]
    Unsorted { prev: String, next: String },

    /// The data file grew past what a u32 sparse offset can address.
    #[error("sstable data file too large for u32 offsets ({0} bytes)")]
    TooLarge(u64),

    #[error("sstable {id} is corrupt: {reason}")]
    Corrupt { id: u64, reason: String },
}

pub type Result<T> = std::result::Result<T, SsTableError>;
