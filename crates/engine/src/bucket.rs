/// A bucket of similarly sized SSTables, the unit of size-tiered compaction.
///
/// A table joins a bucket only while its size stays within
/// `[bucket_low * avg, bucket_high * avg]` of the bucket's running average, so
/// members are size-homogeneous. Once the bucket holds between
/// `min_threshold` and `max_threshold` tables they are merged into one.
use config::CompactionConfig;
use sstable::{SsTable, SsTableWriter};
use std::sync::Arc;
use tracing::debug;

use crate::compaction::{merge_tables, Compaction};
use crate::error::Result;

/// Why [`Bucket::append_table`] turned a table away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Larger than `bucket_high` times the average.
    TooLarge,
    /// Smaller than `min_table_size`.
    BelowFloor,
    /// Smaller than `bucket_low` times the average.
    TooSmall,
}

/// A rejected table, handed back to the caller together with the reason.
#[derive(Debug)]
pub struct Rejected {
    pub table: Arc<SsTable>,
    pub reason: Rejection,
}

/// Where a size falls relative to a bucket's admission band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Below,
    Within,
    Above,
}

#[derive(Debug)]
pub struct Bucket {
    params: CompactionConfig,
    avg_size: f64,
    tables: Vec<Arc<SsTable>>,
}

impl Bucket {
    pub fn new(params: CompactionConfig) -> Self {
        Self {
            params,
            avg_size: 0.0,
            tables: Vec::new(),
        }
    }

    /// Classifies `size` against the band. Every size is `Within` an empty
    /// bucket.
    #[must_use]
    pub fn classify(&self, size: u64) -> SizeClass {
        if self.tables.is_empty() {
            return SizeClass::Within;
        }
        let size = size as f64;
        if size > self.params.bucket_high * self.avg_size {
            SizeClass::Above
        } else if size < self.params.bucket_low * self.avg_size {
            SizeClass::Below
        } else {
            SizeClass::Within
        }
    }

    /// Admits `table` if it fits the bucket, otherwise returns it with the
    /// reason.
    pub fn append_table(&mut self, table: Arc<SsTable>) -> std::result::Result<(), Rejected> {
        let size = table.size_in_bytes();
        let reason = match self.classify(size) {
            SizeClass::Above => Some(Rejection::TooLarge),
            _ if size < self.params.min_table_size => Some(Rejection::BelowFloor),
            SizeClass::Below => Some(Rejection::TooSmall),
            SizeClass::Within => None,
        };
        match reason {
            Some(reason) => Err(Rejected { table, reason }),
            None => {
                self.admit(table);
                Ok(())
            }
        }
    }

    /// Admits `table` without checking the band.
    pub fn absorb(&mut self, table: Arc<SsTable>) {
        self.admit(table);
    }

    fn admit(&mut self, table: Arc<SsTable>) {
        debug!(
            id = table.id(),
            bytes = table.size_in_bytes(),
            members = self.tables.len() + 1,
            "table added to bucket"
        );
        self.tables.push(table);
        self.avg_size = self.total_bytes() as f64 / self.tables.len() as f64;
    }

    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        let n = self.tables.len();
        n >= self.params.min_threshold && n <= self.params.max_threshold
    }

    /// Compacts the bucket if [`needs_compaction`](Self::needs_compaction),
    /// otherwise returns [`Compaction::Skipped`].
    pub fn trigger_compaction(
        &mut self,
        writer: &SsTableWriter,
        outside: &[Arc<SsTable>],
    ) -> Result<Compaction> {
        if !self.needs_compaction() {
            return Ok(Compaction::Skipped);
        }
        self.compact(writer, outside)
    }

    /// Merges every member regardless of the thresholds (needs at least two).
    ///
    /// `outside` are the store's other tables; a tombstone is only dropped
    /// when none of them may hold its key. On success the inputs are retired
    /// and the bucket is emptied; on failure it is left untouched.
    pub fn compact(
        &mut self,
        writer: &SsTableWriter,
        outside: &[Arc<SsTable>],
    ) -> Result<Compaction> {
        if self.tables.len() < 2 {
            return Ok(Compaction::Skipped);
        }
        let outcome = merge_tables(&self.tables, writer, outside)?;
        for table in self.tables.drain(..) {
            table.retire();
        }
        self.avg_size = 0.0;
        Ok(outcome)
    }

    #[must_use]
    pub fn tables(&self) -> &[Arc<SsTable>] {
        &self.tables
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    #[must_use]
    pub fn avg_size(&self) -> f64 {
        self.avg_size
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(|t| t.size_in_bytes()).sum()
    }
}
