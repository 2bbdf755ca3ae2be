//! K-way merge over sorted runs of records.
//!
//! Yields every record of every run ordered by key ascending, then by
//! timestamp descending, then by source table id descending. The first record
//! seen for a key is therefore the newest one, and ties on timestamp are
//! broken deterministically in favour of the more recently created table.
//!
//! This is the core primitive for compaction: scan N input tables, merge,
//! keep the first record per key.

use record::Record;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// The current head of one input run.
struct HeapEntry {
    record: Record,
    table_id: u64,
    /// Index into `MergeIterator::runs`.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the entry that must come out first
        // compares greatest. Smallest key first, then newest timestamp,
        // then highest table id.
        other
            .record
            .key()
            .cmp(self.record.key())
            .then_with(|| self.record.timestamp().cmp(&other.record.timestamp()))
            .then_with(|| self.table_id.cmp(&other.table_id))
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sorted runs, each tagged with the id of the table it came from.
pub struct MergeIterator {
    runs: Vec<(u64, std::vec::IntoIter<Record>)>,
    heap: BinaryHeap<HeapEntry>,
}

impl MergeIterator {
    /// Each run must be sorted by key; keys may repeat across runs.
    pub fn new(runs: Vec<(u64, Vec<Record>)>) -> Self {
        let mut heap = BinaryHeap::with_capacity(runs.len());
        let mut iters = Vec::with_capacity(runs.len());

        for (source, (table_id, records)) in runs.into_iter().enumerate() {
            let mut iter = records.into_iter();
            if let Some(record) = iter.next() {
                heap.push(HeapEntry {
                    record,
                    table_id,
                    source,
                });
            }
            iters.push((table_id, iter));
        }

        Self { runs: iters, heap }
    }
}

impl Iterator for MergeIterator {
    /// `(source table id, record)`
    type Item = (u64, Record);

    fn next(&mut self) -> Option<Self::Item> {
        let top = self.heap.pop()?;
        let (table_id, iter) = &mut self.runs[top.source];
        if let Some(record) = iter.next() {
            self.heap.push(HeapEntry {
                record,
                table_id: *table_id,
                source: top.source,
            });
        }
        Some((top.table_id, top.record))
    }
}
