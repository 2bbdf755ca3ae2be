use bloom::BloomFilter;
use parking_lot::Mutex;
use record::Record;
use std::fs::{self, File};
use std::io::{BufReader, Seek, SeekFrom};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::{Result, SsTableError};
use crate::format::{read_sparse_index, FileKind, SparseEntry, TablePaths};

/// Outcome of a point lookup against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The table holds a record for the key (possibly a tombstone).
    Found(Record),
    /// The key is inside the table's range but not stored in it.
    Absent,
    /// The key lies outside `[min_key, max_key]`; no I/O was done.
    OutOfRange,
}

/// In-memory metadata gathered while writing or opening a table.
pub(crate) struct TableMeta {
    pub(crate) sparse: Vec<SparseEntry>,
    pub(crate) bloom: BloomFilter,
    pub(crate) min_key: String,
    pub(crate) max_key: String,
    pub(crate) size_in_bytes: u64,
    pub(crate) len: usize,
    pub(crate) timestamps: RangeInclusive<u32>,
}

/// An immutable sorted table on disk.
///
/// The sparse index, bloom filter and key range are held in memory; record
/// data is read through a file handle kept open for the table's lifetime.
///
/// Tables are shared as `Arc<SsTable>`. Once compaction has merged a table it
/// is [`retire`](SsTable::retire)d, and its files are deleted when the last
/// handle is dropped, so in-flight reads never lose their file.
pub struct SsTable {
    id: u64,
    paths: TablePaths,
    data: Mutex<BufReader<File>>,
    sparse: Vec<SparseEntry>,
    bloom: BloomFilter,
    min_key: String,
    max_key: String,
    size_in_bytes: u64,
    len: usize,
    timestamps: RangeInclusive<u32>,
    retired: AtomicBool,
    /// Lookups that reached the data file.
    data_reads: AtomicU64,
}

impl SsTable {
    pub(crate) fn from_meta(id: u64, paths: TablePaths, meta: TableMeta) -> Result<Self> {
        let data = open_file(&paths, FileKind::Data)?;
        Ok(Self {
            id,
            paths,
            data: Mutex::new(BufReader::new(data)),
            sparse: meta.sparse,
            bloom: meta.bloom,
            min_key: meta.min_key,
            max_key: meta.max_key,
            size_in_bytes: meta.size_in_bytes,
            len: meta.len,
            timestamps: meta.timestamps,
            retired: AtomicBool::new(false),
            data_reads: AtomicU64::new(0),
        })
    }

    /// Reopens table `id` from `dir`.
    ///
    /// The data file is scanned once to verify every checksum and to recover
    /// the key range and record count; the sparse index and bloom filter are
    /// loaded from their own files.
    pub fn open<P: AsRef<Path>>(dir: P, id: u64) -> Result<Self> {
        let paths = TablePaths::new(dir.as_ref(), id);
        let corrupt = |reason: String| SsTableError::Corrupt { id, reason };

        let mut rdr = BufReader::new(open_file(&paths, FileKind::Data)?);
        let mut min_key: Option<String> = None;
        let mut max_key: Option<String> = None;
        let mut len = 0usize;
        let (mut oldest, mut newest) = (u32::MAX, u32::MIN);
        while let Some(rec) = Record::read_from(&mut rdr)? {
            if let Some(prev) = &max_key {
                if prev.as_str() >= rec.key() {
                    return Err(corrupt(format!("data out of order at key {:?}", rec.key())));
                }
            }
            if min_key.is_none() {
                min_key = Some(rec.key().to_string());
            }
            max_key = Some(rec.key().to_string());
            oldest = oldest.min(rec.timestamp());
            newest = newest.max(rec.timestamp());
            len += 1;
        }
        let size_in_bytes = rdr.stream_position()?;
        let (Some(min_key), Some(max_key)) = (min_key, max_key) else {
            return Err(corrupt("data file holds no records".into()));
        };

        let mut index = BufReader::new(open_file(&paths, FileKind::Index)?);
        let sparse = read_sparse_index(&mut index, id)?;
        match sparse.first() {
            Some(first) if first.offset == 0 && first.key == min_key => {}
            _ => return Err(corrupt("sparse index does not start at the first record".into())),
        }
        if sparse.iter().any(|e| u64::from(e.offset) >= size_in_bytes) {
            return Err(corrupt("sparse index offset beyond data file".into()));
        }

        let mut bloom_file = BufReader::new(open_file(&paths, FileKind::Bloom)?);
        let bloom = BloomFilter::read_from(&mut bloom_file, len)
            .map_err(|e| corrupt(format!("bloom filter: {e}")))?;

        debug!(id, records = len, bytes = size_in_bytes, "sstable opened");
        Self::from_meta(
            id,
            paths,
            TableMeta {
                sparse,
                bloom,
                min_key,
                max_key,
                size_in_bytes,
                len,
                timestamps: oldest..=newest,
            },
        )
    }

    /// Point lookup.
    ///
    /// 1. Outside `[min_key, max_key]` -> [`Lookup::OutOfRange`], no I/O.
    /// 2. Bloom filter negative -> [`Lookup::Absent`], no I/O.
    /// 3. Binary-search the sparse index for the last sampled key `<= key`
    ///    (an exact hit lands directly on the record) and seek there.
    /// 4. Scan forward until the key is found or passed.
    pub fn get(&self, key: &str) -> Result<Lookup> {
        if key < self.min_key.as_str() || key > self.max_key.as_str() {
            return Ok(Lookup::OutOfRange);
        }
        if !self.bloom.may_contain(key.as_bytes()) {
            return Ok(Lookup::Absent);
        }

        let start = match self.sparse.binary_search_by(|e| e.key.as_str().cmp(key)) {
            Ok(i) => self.sparse[i].offset,
            Err(0) => 0,
            Err(i) => self.sparse[i - 1].offset,
        };

        self.data_reads.fetch_add(1, Ordering::Relaxed);
        let mut data = self.data.lock();
        data.seek(SeekFrom::Start(u64::from(start)))?;
        while let Some(rec) = Record::read_from(&mut *data)? {
            match rec.key().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Lookup::Found(rec)),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(Lookup::Absent)
    }

    /// Decodes every record in key order.
    pub fn scan(&self) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(self.len);
        let mut data = self.data.lock();
        data.seek(SeekFrom::Start(0))?;
        while let Some(rec) = Record::read_from(&mut *data)? {
            out.push(rec);
        }
        Ok(out)
    }

    /// Range and bloom check only. `false` means the table cannot hold `key`.
    #[must_use]
    pub fn might_contain(&self, key: &str) -> bool {
        key >= self.min_key.as_str()
            && key <= self.max_key.as_str()
            && self.bloom.may_contain(key.as_bytes())
    }

    /// Marks the table obsolete; its files are deleted on the last drop.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn paths(&self) -> &TablePaths {
        &self.paths
    }

    #[must_use]
    pub fn min_key(&self) -> &str {
        &self.min_key
    }

    #[must_use]
    pub fn max_key(&self) -> &str {
        &self.max_key
    }

    /// Size of the data file in bytes.
    #[must_use]
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    /// Oldest and newest record timestamp in the table.
    #[must_use]
    pub fn timestamps(&self) -> RangeInclusive<u32> {
        self.timestamps.clone()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn sparse_index(&self) -> &[SparseEntry] {
        &self.sparse
    }

    #[must_use]
    pub fn data_reads(&self) -> u64 {
        self.data_reads.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("id", &self.id)
            .field("min_key", &self.min_key)
            .field("max_key", &self.max_key)
            .field("len", &self.len)
            .field("size_in_bytes", &self.size_in_bytes)
            .field("sparse_entries", &self.sparse.len())
            .field("retired", &self.is_retired())
            .finish()
    }
}

impl Drop for SsTable {
    fn drop(&mut self) {
        if !self.is_retired() {
            return;
        }
        // Data first: without it the remaining files are ignored on recovery.
        for kind in FileKind::ALL {
            let path = self.paths.get(kind);
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(id = self.id, path = %path.display(), error = %e, "failed to delete retired table file");
                }
            }
        }
        debug!(id = self.id, "retired sstable deleted");
    }
}

fn open_file(paths: &TablePaths, kind: FileKind) -> Result<File> {
    let path = paths.get(kind);
    File::open(path).map_err(|source| SsTableError::FileInit {
        kind: kind.extension(),
        path: path.to_path_buf(),
        source,
    })
}
