/// Compaction: merges a set of SSTables into one.
///
/// Every input is scanned into a sorted run and the runs are combined by
/// [`MergeIterator`], which yields each key's records newest first (timestamp,
/// then table id). Only that first record survives. A key whose newest record
/// is a tombstone is dropped entirely unless a table outside the merge may
/// still hold an older value for it; then the tombstone is kept to shadow it.
///
/// The merged table gets a fresh id, which outranks every existing table on
/// equal timestamps. A survivor that a later table outside the merge already
/// holds at the same timestamp is therefore dropped, so that newer version
/// stays visible.
use record::Record;
use sstable::{Lookup, MergeIterator, SsTable, SsTableWriter};
use std::sync::Arc;
use tracing::info;

use crate::error::{Result, StoreError};

/// Result of compacting a bucket.
#[derive(Debug)]
pub enum Compaction {
    /// The inputs were replaced by this table.
    Merged(Arc<SsTable>),
    /// Every key was reclaimed; the inputs were replaced by nothing.
    Emptied,
    /// The bucket was not eligible; nothing changed.
    Skipped,
}

pub(crate) fn merge_tables(
    inputs: &[Arc<SsTable>],
    writer: &SsTableWriter,
    outside: &[Arc<SsTable>],
) -> Result<Compaction> {
    let mut runs = Vec::with_capacity(inputs.len());
    for table in inputs {
        let run = table.scan().map_err(|source| StoreError::Table {
            id: table.id(),
            source,
        })?;
        runs.push((table.id(), run));
    }
    let input_records: usize = runs.iter().map(|(_, run)| run.len()).sum();

    let mut survivors: Vec<Record> = Vec::new();
    let mut reclaimed = 0usize;
    let mut superseded = 0usize;
    let mut current: Option<String> = None;
    for (origin, record) in MergeIterator::new(runs) {
        if current.as_deref() == Some(record.key()) {
            // shadowed by the newer record already handled
            continue;
        }
        current = Some(record.key().to_string());

        if superseded_outside(&record, origin, outside)? {
            superseded += 1;
            continue;
        }
        if record.is_tombstone() && !outside.iter().any(|t| t.might_contain(record.key())) {
            reclaimed += 1;
            continue;
        }
        survivors.push(record);
    }

    let input_ids: Vec<u64> = inputs.iter().map(|t| t.id()).collect();
    if survivors.is_empty() {
        info!(inputs = ?input_ids, input_records, reclaimed, superseded, "compaction reclaimed every key");
        return Ok(Compaction::Emptied);
    }

    let merged = writer.write_sorted(&survivors)?;
    info!(
        inputs = ?input_ids,
        output = merged.id(),
        input_records,
        output_records = merged.len(),
        reclaimed,
        superseded,
        bytes = merged.size_in_bytes(),
        "compaction finished"
    );
    Ok(Compaction::Merged(Arc::new(merged)))
}

/// Whether a table outside the merge, created after table `origin`, stores
/// `record`'s key at the same timestamp.
fn superseded_outside(record: &Record, origin: u64, outside: &[Arc<SsTable>]) -> Result<bool> {
    let ts = record.timestamp();
    let newer = outside.iter().filter(|t| {
        t.id() > origin && t.timestamps().contains(&ts) && t.might_contain(record.key())
    });
    for table in newer {
        let lookup = table.get(record.key()).map_err(|source| StoreError::Table {
            id: table.id(),
            source,
        })?;
        if matches!(lookup, Lookup::Found(other) if other.timestamp() == ts) {
            return Ok(true);
        }
    }
    Ok(false)
}
