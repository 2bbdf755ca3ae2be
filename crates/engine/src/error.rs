use config::ConfigError;
use record::RecordError;
use sstable::SsTableError;
use std::io;
use thiserror::Error;
use wal::WalError;

/// Errors returned by [`DiskStore`](crate::DiskStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("value must not be empty")]
    EmptyValue,

    #[error("key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// The key was never written, or its latest record is a tombstone.
    #[error("key not found: {0:?}")]
    KeyNotFound(String),

    /// Reading one particular table failed (corruption or I/O).
    #[error("sstable {id}: {source}")]
    Table {
        id: u64,
        #[source]
        source: SsTableError,
    },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    SsTable(#[from] SsTableError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
