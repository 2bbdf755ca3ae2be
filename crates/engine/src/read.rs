/// Read path: `get()`.
///
/// The active memtable is checked first, then the frozen memtables newest to
/// oldest; the first hit there is the newest record. Otherwise every table
/// that may hold the key is consulted and the newest record across them wins.
/// A tombstone anywhere in that order means the key is deleted.
use record::Record;

use crate::error::{Result, StoreError};
use crate::manager::newest_among;
use crate::write::check_key;
use crate::DiskStore;

impl DiskStore {
    /// Returns the live value for `key`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::KeyNotFound`] if the key was never written or was
    ///   deleted.
    /// - [`StoreError::Table`] if a candidate table fails to read.
    pub fn get(&self, key: &str) -> Result<String> {
        check_key(key)?;
        match self.lookup(key)? {
            Some(record) if !record.is_tombstone() => Ok(record.value().to_string()),
            _ => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    /// The newest record for `key`, tombstones included.
    pub(crate) fn lookup(&self, key: &str) -> Result<Option<Record>> {
        let candidates = {
            let inner = self.inner.lock();
            if let Some(record) = inner.active.get(key) {
                return Ok(Some(record.clone()));
            }
            for mem in inner.frozen.iter().rev() {
                if let Some(record) = mem.get(key) {
                    return Ok(Some(record.clone()));
                }
            }
            inner.buckets.snapshot(key)
        };
        // lock released; the snapshot keeps retired tables readable
        newest_among(&candidates, key)
    }
}
