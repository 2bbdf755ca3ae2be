/// Cold start: `DiskStore::open()`.
///
/// Leftovers of interrupted table writes are removed, every complete table is
/// reopened and placed through the bucket manager smallest first, and the WAL is
/// replayed into a fresh memtable.
use config::StoreConfig;
use memtable::Memtable;
use parking_lot::Mutex;
use sstable::{
    parse_table_file, FileKind, SsTable, SsTableError, SsTableWriter, TableIds, TablePaths,
    TMP_SUFFIX,
};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wal::{Op, WalError, WalReader, WalWriter};

use crate::error::{Result, StoreError};
use crate::manager::BucketManager;
use crate::{DiskStore, StoreInner};

impl DiskStore {
    /// Opens (or creates) the store in `config.data_dir`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Validate the config and create the data directory.
    /// 2. Delete `*.tmp` files and table file sets without a data file.
    /// 3. Seed the id allocator past the largest table id on disk.
    /// 4. Reopen every table (verifying checksums), place them smallest first,
    ///    then compact any bucket left eligible.
    /// 5. Replay the WAL into the active memtable and drop any torn tail.
    /// 6. Open the WAL writer in append mode.
    ///
    /// # Errors
    ///
    /// Invalid config, I/O failures, a corrupt table (reported with its id),
    /// or a corrupt WAL frame.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let table_ids = clean_data_dir(&config.data_dir)?;

        // Reopened tables may compact during placement and allocate new ids.
        let ids = Arc::new(TableIds::default());
        if let Some(&max) = table_ids.last() {
            ids.advance_past(max);
        }

        let writer = SsTableWriter::new(&config.data_dir, Arc::clone(&ids), config.table);
        let mut tables = Vec::with_capacity(table_ids.len());
        for &id in &table_ids {
            let table = SsTable::open(&config.data_dir, id)
                .map_err(|source| StoreError::Table { id, source })?;
            tables.push(Arc::new(table));
        }

        let mut buckets = BucketManager::new(writer, config.compaction);
        buckets.restore_tables(tables)?;

        let wal_path = config.wal_path();
        let mut active = Memtable::new();
        let replayed = replay_wal(&wal_path, &mut active)?;
        // opened after replay so the reader sees the whole file
        let wal = WalWriter::create(&wal_path, config.wal.durability)?;

        info!(
            dir = %config.data_dir.display(),
            tables = buckets.table_count(),
            levels = ?buckets.level_counts(),
            wal_records = replayed,
            memtable_entries = active.len(),
            "store opened"
        );

        Ok(Self {
            config,
            ids,
            inner: Mutex::new(StoreInner {
                active,
                frozen: VecDeque::new(),
                wal,
                buckets,
            }),
        })
    }
}

/// Replays the WAL at `path` into `mem`, returning the number of frames
/// applied, and truncates the file after the last complete frame. A missing
/// file is a fresh start.
fn replay_wal(path: &Path, mem: &mut Memtable) -> Result<usize> {
    let mut reader = match WalReader::open(path) {
        Ok(reader) => reader,
        Err(WalError::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let applied = reader.replay(|op, record| match op {
        Op::Put | Op::Delete => mem.put(record),
        Op::Get => {}
    })?;
    // New frames must not land behind a torn tail.
    wal::discard_tail(path, reader.valid_len())?;
    Ok(applied)
}

/// Removes temporary files and incomplete table sets from `dir`, returning
/// the ids of complete tables in ascending order.
///
/// The data file is renamed into place last, so a set without one never
/// finished writing. A data file missing its index or bloom file is reported
/// as corruption rather than deleted.
fn clean_data_dir(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(TMP_SUFFIX) {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed temporary file"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary file"),
            }
        } else if let Some((id, _)) = parse_table_file(name) {
            ids.insert(id);
        }
    }

    let mut complete = Vec::with_capacity(ids.len());
    for id in ids {
        let paths = TablePaths::new(dir, id);
        if paths.all_exist() {
            complete.push(id);
            continue;
        }
        if !paths.data.exists() {
            warn!(id, "removing incomplete sstable");
            for kind in FileKind::ALL {
                let path = paths.get(kind);
                if let Err(e) = fs::remove_file(path) {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "failed to remove sstable file");
                    }
                }
            }
            continue;
        }
        let missing: Vec<&str> = FileKind::ALL
            .iter()
            .filter(|&&kind| !paths.get(kind).exists())
            .map(|&kind| kind.extension())
            .collect();
        return Err(StoreError::Table {
            id,
            source: SsTableError::Corrupt {
                id,
                reason: format!("data file present but missing {}", missing.join(", ")),
            },
        });
    }
    Ok(complete)
}
