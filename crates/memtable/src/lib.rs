//! # Memtable
//!
//! The in-memory write buffer of the StrataKV store: the most recent
//! [`Record`] for each key, kept in key order by an arena-backed red-black
//! tree ([`RbTree`]).
//!
//! Tombstones are stored like any other record so they can shadow older
//! values on disk. `size_in_bytes` grows by the encoded size of every record
//! put, including ones that replace an existing key; the store flushes once it
//! reaches the configured threshold.

mod rbtree;

pub use rbtree::{Iter, RbTree};

use record::Record;
use sstable::{SsTable, SsTableWriter};

#[derive(Debug, Default)]
pub struct Memtable {
    tree: RbTree<String, Record>,
    size_in_bytes: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record for its key.
    pub fn put(&mut self, record: Record) {
        self.size_in_bytes += record.size();
        self.tree.insert(record.key().to_string(), record);
    }

    /// The latest record for `key`, tombstones included.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.tree.get(key)
    }

    /// Records in ascending key order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Record> + '_ {
        self.tree.iter().map(|(_, rec)| rec)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Sum of the encoded sizes of every record ever put.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.size_in_bytes
    }

    /// Writes the contents as a new SSTable. The memtable is left untouched.
    pub fn flush(&self, writer: &SsTableWriter) -> sstable::Result<SsTable> {
        writer.write_sorted(self.iter())
    }
}
