/// Write path: `put()`, `delete()`, `put_record()`, `put_records()`, and the
/// flush that runs when the active memtable reaches the threshold.
///
/// Every mutation is appended to the WAL first, then applied to the active
/// memtable, all under the store lock.
use record::{unix_timestamp, Record, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use std::sync::Arc;
use tracing::info;
use wal::Op;

use crate::error::{Result, StoreError};
use crate::{DiskStore, StoreInner};

pub(crate) fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn check_value_size(value: &str) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(StoreError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

impl DiskStore {
    /// Stores `value` under `key` with the current timestamp.
    ///
    /// # Errors
    ///
    /// Validation errors for an empty or oversized key or value; WAL and flush
    /// failures are propagated.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        check_key(&key)?;
        if value.is_empty() {
            return Err(StoreError::EmptyValue);
        }
        check_value_size(&value)?;

        let record = Record::new(key, value, unix_timestamp());
        let mut inner = self.inner.lock();
        self.apply(&mut inner, Op::Put, record)
    }

    /// Deletes `key` by writing a tombstone. Older values stay on disk until
    /// compaction reclaims them.
    pub fn delete(&self, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        check_key(&key)?;

        let record = Record::tombstone(key, unix_timestamp());
        let mut inner = self.inner.lock();
        self.apply(&mut inner, Op::Delete, record)
    }

    /// Inserts an already built record, keeping its timestamp and tombstone
    /// flag. Used to load keys migrated from another node.
    ///
    /// Emptiness is not checked, but the size limits are: a record that
    /// exceeds them could not be read back from the WAL.
    pub fn put_record(&self, record: Record) -> Result<()> {
        check_record(&record)?;
        let mut inner = self.inner.lock();
        self.apply(&mut inner, op_for(&record), record)
    }

    /// Bulk form of [`put_record`](Self::put_record), applied under a single
    /// lock acquisition. Stops at the first failing record; the ones before
    /// it stay applied. Returns the number of records inserted.
    pub fn put_records<I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut inner = self.inner.lock();
        let mut applied = 0usize;
        for record in records {
            check_record(&record)?;
            self.apply(&mut inner, op_for(&record), record)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Flushes the active memtable (and any queued ones) even below the
    /// threshold. No-op when there is nothing to flush.
    pub fn force_flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.active.is_empty() && inner.frozen.is_empty() {
            return Ok(());
        }
        self.rotate_and_flush(&mut inner)
    }

    /// Compacts every level holding two or more tables. Returns the number of
    /// merges performed.
    pub fn force_compaction(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let merges = inner.buckets.compact_all()?;
        info!(merges, tables = inner.buckets.table_count(), "manual compaction finished");
        Ok(merges)
    }

    /// Writes any batched WAL frames and fsyncs the log.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().wal.sync()?;
        Ok(())
    }

    fn apply(&self, inner: &mut StoreInner, op: Op, record: Record) -> Result<()> {
        // Append to WAL first
        inner.wal.append(op, &record)?;
        inner.active.put(record);

        if inner.active.size_in_bytes() >= self.config.flush_threshold {
            self.rotate_and_flush(inner)?;
        }
        Ok(())
    }

    /// Freezes the active memtable and flushes every queued memtable, oldest
    /// first, handing each new table to the bucket manager. The WAL is reset
    /// once the queue is empty.
    ///
    /// A memtable leaves the queue as soon as its table is written, so a later
    /// compaction failure cannot flush it twice. If writing the table fails
    /// the memtable stays queued and readable, and the next flush retries it.
    fn rotate_and_flush(&self, inner: &mut StoreInner) -> Result<()> {
        if !inner.active.is_empty() {
            let frozen = std::mem::take(&mut inner.active);
            inner.frozen.push_back(frozen);
        }

        loop {
            let table = match inner.frozen.front() {
                Some(mem) => mem.flush(inner.buckets.writer())?,
                None => break,
            };
            let entries = inner.frozen.pop_front().map_or(0, |mem| mem.len());
            info!(
                id = table.id(),
                entries,
                bytes = table.size_in_bytes(),
                "memtable flushed"
            );
            inner.buckets.insert_table(Arc::new(table))?;
        }

        inner.wal.reset()?;
        Ok(())
    }
}

fn check_record(record: &Record) -> Result<()> {
    if record.key().len() > MAX_KEY_SIZE {
        return Err(StoreError::KeyTooLarge {
            size: record.key().len(),
            max: MAX_KEY_SIZE,
        });
    }
    check_value_size(record.value())
}

fn op_for(record: &Record) -> Op {
    if record.is_tombstone() {
        Op::Delete
    } else {
        Op::Put
    }
}
