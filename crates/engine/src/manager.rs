/// The bucket manager: maps levels to [`Bucket`]s and places tables.
///
/// Level 0 receives fresh flushes; each compaction promotes its output at
/// least one level up, so level numbers grow with table size and age.
///
/// ```text
///  level 2   [ 16x ]
///  level 1   [ 4x ][ 4x ]
///  level 0   [ 1x ][ 1x ][ 1x ]   <- flushes
/// ```
use config::CompactionConfig;
use record::Record;
use sstable::{Lookup, SsTable, SsTableWriter};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::bucket::{Bucket, Rejected, Rejection, SizeClass};
use crate::compaction::Compaction;
use crate::error::{Result, StoreError};

#[derive(Debug)]
pub struct BucketManager {
    levels: BTreeMap<usize, Bucket>,
    params: CompactionConfig,
    writer: SsTableWriter,
}

impl BucketManager {
    pub fn new(writer: SsTableWriter, params: CompactionConfig) -> Self {
        let mut levels = BTreeMap::new();
        levels.insert(0, Bucket::new(params));
        Self {
            levels,
            params,
            writer,
        }
    }

    #[must_use]
    pub fn writer(&self) -> &SsTableWriter {
        &self.writer
    }

    /// Places a freshly flushed (or reopened) table, compacting the receiving
    /// bucket if it became eligible. A merged table is placed again starting
    /// one level above its inputs, which may cascade further.
    pub fn insert_table(&mut self, table: Arc<SsTable>) -> Result<()> {
        self.insert_from(table, 0)
    }

    /// Places reopened tables, smallest first, then compacts any bucket that
    /// became eligible. Nothing is merged until every table is placed, so
    /// tombstones are judged against the whole set.
    pub fn restore_tables(&mut self, mut tables: Vec<Arc<SsTable>>) -> Result<()> {
        tables.sort_by_key(|t| (t.size_in_bytes(), t.id()));
        for table in tables {
            let target = self.target_level(table.size_in_bytes(), 0);
            self.place(table, target);
        }
        self.sweep(false).map(|_| ())
    }

    fn insert_from(&mut self, table: Arc<SsTable>, min_level: usize) -> Result<()> {
        let mut pending = Some((table, min_level));
        while let Some((table, min_level)) = pending.take() {
            let target = self.target_level(table.size_in_bytes(), min_level);
            let level = self.place(table, target);

            let outside = self.tables_outside(level);
            if let Some(bucket) = self.levels.get_mut(&level) {
                let outcome = bucket.trigger_compaction(&self.writer, &outside)?;
                if let Compaction::Merged(merged) = outcome {
                    pending = Some((merged, level + 1));
                }
            }
        }
        Ok(())
    }

    /// Picks a level for a table of `size` bytes, no lower than `min_level`.
    ///
    /// Non-empty buckets are compared from the highest level down: within a
    /// bucket's band selects that level, above it selects the level above,
    /// below it keeps walking down.
    fn target_level(&self, size: u64, min_level: usize) -> usize {
        for (&level, bucket) in self.levels.range(min_level..).rev() {
            if bucket.is_empty() {
                continue;
            }
            match bucket.classify(size) {
                SizeClass::Within => return level,
                SizeClass::Above => return level + 1,
                SizeClass::Below => continue,
            }
        }
        min_level
    }

    /// Adds `table` at `level`, moving it up while it is too large. A table
    /// too small for its bucket is kept there anyway. Returns the final level.
    fn place(&mut self, mut table: Arc<SsTable>, mut level: usize) -> usize {
        let params = self.params;
        loop {
            let bucket = self.levels.entry(level).or_insert_with(|| Bucket::new(params));
            match bucket.append_table(table) {
                Ok(()) => return level,
                Err(Rejected {
                    table: rejected,
                    reason: Rejection::TooLarge,
                }) => {
                    debug!(id = rejected.id(), level, "table too large for bucket, promoting");
                    table = rejected;
                    level += 1;
                }
                Err(Rejected {
                    table: rejected,
                    reason,
                }) => {
                    debug!(id = rejected.id(), level, ?reason, "table outside bucket band, keeping it here");
                    bucket.absorb(rejected);
                    return level;
                }
            }
        }
    }

    /// Every table not in `level`'s bucket.
    fn tables_outside(&self, level: usize) -> Vec<Arc<SsTable>> {
        self.levels
            .iter()
            .filter(|(l, _)| **l != level)
            .flat_map(|(_, b)| b.tables().iter().cloned())
            .collect()
    }

    /// Compacts every level holding two or more tables, lowest level first.
    /// Returns the number of merges performed.
    pub fn compact_all(&mut self) -> Result<usize> {
        self.sweep(true)
    }

    /// Walks the levels upward, compacting each bucket that is eligible
    /// (or, when `force`d, holds two or more tables).
    fn sweep(&mut self, force: bool) -> Result<usize> {
        let mut merges = 0usize;
        let mut next = 0usize;
        while let Some(level) = self.levels.range(next..).next().map(|(&l, _)| l) {
            next = level + 1;
            let outside = self.tables_outside(level);
            let Some(bucket) = self.levels.get_mut(&level) else {
                continue;
            };
            let outcome = if force {
                bucket.compact(&self.writer, &outside)?
            } else {
                bucket.trigger_compaction(&self.writer, &outside)?
            };
            match outcome {
                Compaction::Merged(merged) => {
                    merges += 1;
                    self.insert_from(merged, level + 1)?;
                }
                Compaction::Emptied => merges += 1,
                Compaction::Skipped => {}
            }
        }
        Ok(merges)
    }

    /// Tables that may hold `key`, highest level first.
    ///
    /// The handles keep retired tables readable, so the caller can finish the
    /// lookup without holding the store lock.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Vec<Arc<SsTable>> {
        self.levels
            .values()
            .rev()
            .flat_map(|b| b.tables().iter())
            .filter(|t| t.might_contain(key))
            .cloned()
            .collect()
    }

    /// The newest on-disk record for `key`, tombstones included.
    pub fn retrieve_key(&self, key: &str) -> Result<Option<Record>> {
        newest_among(&self.snapshot(key), key)
    }

    /// Every live table, highest level first.
    #[must_use]
    pub fn all_tables(&self) -> Vec<Arc<SsTable>> {
        self.levels
            .values()
            .rev()
            .flat_map(|b| b.tables().iter().cloned())
            .collect()
    }

    #[must_use]
    pub fn bucket(&self, level: usize) -> Option<&Bucket> {
        self.levels.get(&level)
    }

    /// `(level, table count)` for every level, ascending.
    #[must_use]
    pub fn level_counts(&self) -> Vec<(usize, usize)> {
        self.levels.iter().map(|(&l, b)| (l, b.len())).collect()
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.levels.values().map(Bucket::len).sum()
    }

    /// The highest level holding at least one table.
    #[must_use]
    pub fn highest_level(&self) -> Option<usize> {
        self.levels
            .iter()
            .rev()
            .find(|(_, b)| !b.is_empty())
            .map(|(&l, _)| l)
    }
}

/// Looks `key` up in every table and returns the newest record, ordered by
/// timestamp and then by table id.
pub(crate) fn newest_among(tables: &[Arc<SsTable>], key: &str) -> Result<Option<Record>> {
    let mut best: Option<((u32, u64), Record)> = None;
    for table in tables {
        let lookup = table.get(key).map_err(|source| StoreError::Table {
            id: table.id(),
            source,
        })?;
        if let Lookup::Found(record) = lookup {
            let rank = (record.timestamp(), table.id());
            if best.as_ref().map_or(true, |(r, _)| rank > *r) {
                best = Some((rank, record));
            }
        }
    }
    Ok(best.map(|(_, record)| record))
}
