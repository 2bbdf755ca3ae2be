//! # SSTable - Sorted String Table
//!
//! Immutable on-disk tables for the StrataKV storage engine.
//!
//! A frozen memtable is flushed to disk as an SSTable, and compaction merges
//! several SSTables into one. Tables are *write-once, read-many*: they are
//! never modified, only replaced.
//!
//! ## Files
//!
//! ```text
//! ┌─────────────────────────── sst_N.data ───────────────────────────┐
//! │ record | record | record | ...        (ascending by key)          │
//! │ record = header(17 B) | key | value   (see the `record` crate)    │
//! └───────────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────── sst_N.index ──────────────────────────┐
//! │ key_size (u32) | key | offset (u32)   every Nth record            │
//! └───────────────────────────────────────────────────────────────────┘
//! ┌─────────────────────────── sst_N.bloom ──────────────────────────┐
//! │ one byte per filter bit (0x00 / 0x01)                             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Sparse offsets are byte positions in the
//! data file.
//!
//! ## Lookups
//!
//! ```text
//! key outside [min, max] ──> OutOfRange
//! bloom says no         ──> Absent
//! sparse index binary search ──> seek ──> scan forward ──> Found / Absent
//! ```

mod error;
mod format;
mod merge;
mod table;
mod writer;

pub use error::{Result, SsTableError};
pub use format::{parse_table_file, tmp_path, FileKind, SparseEntry, TablePaths, TMP_SUFFIX};
pub use merge::MergeIterator;
pub use table::{Lookup, SsTable};
pub use writer::{SsTableWriter, TableIds};

#[cfg(test)]
mod tests;
