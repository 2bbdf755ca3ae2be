use bloom::BloomFilter;
use config::TableConfig;
use record::Record;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SsTableError};
use crate::format::{tmp_path, write_sparse_entry, FileKind, SparseEntry, TablePaths};
use crate::table::{SsTable, TableMeta};

/// Monotonic allocator for table ids.
///
/// Shared by every writer of one store so flushes and compactions never reuse
/// an id. Recovery seeds it past the largest id found on disk.
#[derive(Debug, Default)]
pub struct TableIds {
    next: AtomicU64,
}

impl TableIds {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Ensures future ids are greater than `id`.
    pub fn advance_past(&self, id: u64) {
        self.next.fetch_max(id.saturating_add(1), Ordering::SeqCst);
    }

    /// The id the next [`allocate`](Self::allocate) call will return.
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Builds immutable SSTables from sorted records.
///
/// Each of the three files is written to a `.tmp` sibling, fsynced, and renamed
/// into place; the data file is renamed last, so a table whose data file exists
/// is complete. On failure the temporary files are removed.
#[derive(Debug, Clone)]
pub struct SsTableWriter {
    dir: PathBuf,
    ids: Arc<TableIds>,
    sparse_interval: usize,
    bloom_fpr: f64,
}

/// Output files of a build in progress.
struct PendingFiles {
    data: BufWriter<File>,
    index: BufWriter<File>,
    bloom: BufWriter<File>,
}

impl SsTableWriter {
    pub fn new<P: AsRef<Path>>(dir: P, ids: Arc<TableIds>, table: TableConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ids,
            sparse_interval: table.sparse_interval.max(1),
            bloom_fpr: table.bloom_fpr,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn ids(&self) -> &Arc<TableIds> {
        &self.ids
    }

    /// Writes `records` (strictly ascending by key) as a new table and opens it.
    ///
    /// In a single pass this records the min and max key, samples every
    /// `sparse_interval`-th record into the sparse index, encodes each record
    /// into the data file and adds each key to a bloom filter sized for the
    /// record count.
    ///
    /// # Errors
    ///
    /// - [`SsTableError::Empty`] for an empty input.
    /// - [`SsTableError::Unsorted`] if keys are not strictly ascending.
    /// - [`SsTableError::TooLarge`] if a record starts beyond `u32::MAX`.
    /// - [`SsTableError::FileInit`] if a file cannot be created.
    pub fn write_sorted<'a, I>(&self, records: I) -> Result<SsTable>
    where
        I: IntoIterator<Item = &'a Record>,
        I::IntoIter: ExactSizeIterator,
    {
        let records = records.into_iter();
        let expected = records.len();
        if expected == 0 {
            return Err(SsTableError::Empty);
        }

        let id = self.ids.allocate();
        let paths = TablePaths::new(&self.dir, id);

        match self.build(id, &paths, expected, records) {
            Ok(meta) => {
                debug!(
                    id,
                    records = meta.len,
                    bytes = meta.size_in_bytes,
                    "sstable written"
                );
                SsTable::from_meta(id, paths, meta)
            }
            Err(e) => {
                let complete = paths.data.exists();
                for kind in FileKind::ALL {
                    let mut leftovers = vec![tmp_path(paths.get(kind))];
                    if !complete {
                        leftovers.push(paths.get(kind).to_path_buf());
                    }
                    for path in leftovers.iter().filter(|p| p.exists()) {
                        if let Err(rm) = fs::remove_file(path) {
                            warn!(path = %path.display(), error = %rm, "failed to remove partial table file");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn build<'a, I>(
        &self,
        id: u64,
        paths: &TablePaths,
        expected: usize,
        records: I,
    ) -> Result<TableMeta>
    where
        I: Iterator<Item = &'a Record>,
    {
        let mut files = PendingFiles {
            data: create_tmp(paths, FileKind::Data)?,
            index: create_tmp(paths, FileKind::Index)?,
            bloom: create_tmp(paths, FileKind::Bloom)?,
        };

        let mut bloom = BloomFilter::new(expected, self.bloom_fpr);
        let mut sparse: Vec<SparseEntry> = Vec::with_capacity(expected / self.sparse_interval + 1);
        let mut min_key: Option<String> = None;
        let mut prev_key: Option<&str> = None;
        let mut offset: u64 = 0;
        let mut len = 0usize;
        let (mut oldest, mut newest) = (u32::MAX, u32::MIN);
        let mut scratch = Vec::with_capacity(256);

        for rec in records {
            if let Some(prev) = prev_key {
                if prev >= rec.key() {
                    return Err(SsTableError::Unsorted {
                        prev: prev.to_string(),
                        next: rec.key().to_string(),
                    });
                }
            }
            let start = u32::try_from(offset).map_err(|_| SsTableError::TooLarge(offset))?;

            if len % self.sparse_interval == 0 {
                write_sparse_entry(&mut files.index, rec.key(), start)?;
                sparse.push(SparseEntry {
                    key: rec.key().to_string(),
                    offset: start,
                });
            }

            scratch.clear();
            rec.encode_into(&mut scratch);
            files.data.write_all(&scratch)?;
            bloom.insert(rec.key().as_bytes());

            if min_key.is_none() {
                min_key = Some(rec.key().to_string());
            }
            prev_key = Some(rec.key());
            oldest = oldest.min(rec.timestamp());
            newest = newest.max(rec.timestamp());
            offset += scratch.len() as u64;
            len += 1;
        }

        let (Some(min_key), Some(max_key)) = (min_key, prev_key.map(str::to_string)) else {
            return Err(SsTableError::Empty);
        };

        bloom.write_to(&mut files.bloom)?;

        // Index and bloom first; a present data file marks a complete table.
        finish(files.index, paths, FileKind::Index)?;
        finish(files.bloom, paths, FileKind::Bloom)?;
        finish(files.data, paths, FileKind::Data)?;
        // Not supported on every platform; the table is complete either way.
        if let Err(e) = sync_dir(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "failed to fsync sstable directory");
        }

        Ok(TableMeta {
            sparse,
            bloom,
            min_key,
            max_key,
            size_in_bytes: offset,
            len,
            timestamps: oldest..=newest,
        })
    }
}

fn create_tmp(paths: &TablePaths, kind: FileKind) -> Result<BufWriter<File>> {
    let path = tmp_path(paths.get(kind));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
        .map_err(|source| SsTableError::FileInit {
            kind: kind.extension(),
            path: path.clone(),
            source,
        })?;
    Ok(BufWriter::new(file))
}

fn finish(mut w: BufWriter<File>, paths: &TablePaths, kind: FileKind) -> Result<()> {
    w.flush()?;
    let file = w.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    let target = paths.get(kind);
    fs::rename(tmp_path(target), target)?;
    Ok(())
}

/// Fsyncs the directory so the renames survive a crash.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
