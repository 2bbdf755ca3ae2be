//! # Engine - StrataKV Storage Engine
//!
//! [`DiskStore`] ties the [`memtable`], [`wal`] and [`sstable`] crates together
//! into a log-structured key-value store with size-tiered compaction.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌────────────────────────────────────────────────────┐
//! │                    DISKSTORE                       │
//! │                                                    │
//! │ write.rs → WAL append → Memtable insert            │
//! │              |                                     │
//! │              |  (size >= flush_threshold?)         │
//! │              v                                     │
//! │           frozen queue → flush → new SSTable       │
//! │              |                                     │
//! │              v                                     │
//! │ manager.rs  insert_table → Bucket (level N)        │
//! │              |                                     │
//! │              |  (min <= members <= max?)           │
//! │              v                                     │
//! │ bucket.rs   compaction → merged SSTable → level N+1│
//! │                                                    │
//! │ read.rs → Memtable → frozen queue → SSTables       │
//! │            (newest record wins)                    │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                   |
//! |----------------|-----------------------------------------------------------|
//! | [`lib.rs`]     | `DiskStore` struct, accessors, `stats()`, `Debug`, `Drop` |
//! | [`recovery`]   | `open()`: directory cleanup, table reload, WAL replay     |
//! | [`write`]      | `put()`, `delete()`, `put_record()`, flush                |
//! | [`read`]       | `get()`                                                   |
//! | [`manager`]    | level placement, cascading compaction, multi-table reads  |
//! | [`bucket`]     | size-band admission and compaction trigger                |
//! | [`compaction`] | k-way merge, duplicate resolution, tombstone GC           |
//!
//! ## Concurrency
//!
//! One `parking_lot::Mutex` guards the memtables, the WAL and the bucket
//! manager, so writes are serialized and a put that crosses the flush
//! threshold runs the flush (and any compaction it triggers) inline. Reads hold
//! the lock only while checking the memtables and collecting candidate tables;
//! the disk lookups run after it is released. Tables are `Arc`-shared and a
//! table retired by compaction keeps its files until the last reader drops it.
//!
//! ## Crash Safety
//!
//! Every write is appended to the WAL **before** the memtable update. The WAL
//! is truncated only once every frozen memtable has been written out. Table
//! files are written to temporaries and renamed into place, data file last.
//! On open, a torn WAL tail left by a crash is cut off before new appends.
mod bucket;
mod compaction;
mod error;
mod manager;
mod read;
mod recovery;
mod write;

pub use bucket::{Bucket, Rejected, Rejection, SizeClass};
pub use compaction::Compaction;
pub use error::{Result, StoreError};
pub use manager::BucketManager;

use config::StoreConfig;
use memtable::Memtable;
use parking_lot::Mutex;
use sstable::TableIds;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;
use wal::WalWriter;

/// The storage engine.
///
/// All methods take `&self`; share a store between threads with `Arc`.
pub struct DiskStore {
    config: StoreConfig,
    ids: Arc<TableIds>,
    pub(crate) inner: Mutex<StoreInner>,
}

/// State guarded by the store lock.
pub(crate) struct StoreInner {
    pub(crate) active: Memtable,
    /// Memtables waiting to be flushed, oldest first.
    pub(crate) frozen: VecDeque<Memtable>,
    pub(crate) wal: WalWriter,
    pub(crate) buckets: BucketManager,
}

/// Point-in-time counters, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub memtable_entries: usize,
    pub memtable_bytes: usize,
    pub frozen_memtables: usize,
    pub tables: usize,
    /// `(level, table count)`, ascending by level.
    pub levels: Vec<(usize, usize)>,
    pub next_table_id: u64,
    pub wal_pending_bytes: usize,
}

impl DiskStore {
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            memtable_entries: inner.active.len(),
            memtable_bytes: inner.active.size_in_bytes(),
            frozen_memtables: inner.frozen.len(),
            tables: inner.buckets.table_count(),
            levels: inner.buckets.level_counts(),
            next_table_id: self.ids.peek(),
            wal_pending_bytes: inner.wal.pending_bytes(),
        }
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("DiskStore");
        s.field("data_dir", &self.config.data_dir)
            .field("flush_threshold", &self.config.flush_threshold)
            .field("durability", &self.config.wal.durability)
            .field("next_table_id", &self.ids.peek());
        // Debug must not block behind a running flush.
        if let Some(inner) = self.inner.try_lock() {
            s.field("memtable_entries", &inner.active.len())
                .field("memtable_bytes", &inner.active.size_in_bytes())
                .field("frozen_memtables", &inner.frozen.len())
                .field("levels", &inner.buckets.level_counts());
        }
        s.finish()
    }
}

/// Best-effort WAL sync on drop.
///
/// Frozen memtables that failed to flush are not retried here; their records
/// are still in the WAL and come back on the next [`DiskStore::open`].
impl Drop for DiskStore {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Err(e) = inner.wal.sync() {
            warn!(error = %e, "failed to sync wal on close");
        }
    }
}

#[cfg(test)]
mod tests;
