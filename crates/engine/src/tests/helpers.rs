use config::{CompactionConfig, Durability, StoreConfig, TableConfig};
use record::Record;
use sstable::{parse_table_file, FileKind, SsTable, SsTableWriter, TableIds};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::DiskStore;

pub const TS: u32 = 1_700_000_000;

/// Config that flushes every 8 `key(i)`/`value(i)` puts (33 bytes each).
pub fn small_config(dir: &Path) -> StoreConfig {
    let mut config = StoreConfig::new(dir);
    config.flush_threshold = 256;
    config.wal.durability = Durability::Batched {
        threshold_bytes: 4096,
    };
    config.table.sparse_interval = 4;
    config.compaction.min_table_size = 64;
    config
}

pub fn open_small(dir: &Path) -> anyhow::Result<DiskStore> {
    Ok(DiskStore::open(small_config(dir))?)
}

pub fn key(i: usize) -> String {
    format!("key{:04}", i)
}

pub fn value(i: usize) -> String {
    format!("value{:04}", i)
}

pub fn count_data_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(parse_table_file)
                .map(|(_, kind)| kind == FileKind::Data)
                .unwrap_or(false)
        })
        .count()
}

pub fn params() -> CompactionConfig {
    CompactionConfig {
        min_table_size: 10,
        ..CompactionConfig::default()
    }
}

pub fn table_writer(dir: &Path) -> SsTableWriter {
    let table = TableConfig {
        sparse_interval: 4,
        ..TableConfig::default()
    };
    SsTableWriter::new(dir, Arc::new(TableIds::default()), table)
}

/// A table of `n` records `key(first)..key(first + n)`, each value `value_len`
/// bytes long, so every record is `24 + value_len` bytes.
pub fn table_of(
    writer: &SsTableWriter,
    first: usize,
    n: usize,
    value_len: usize,
    ts: u32,
) -> Arc<SsTable> {
    let records: Vec<Record> = (first..first + n)
        .map(|i| Record::new(key(i), "v".repeat(value_len), ts))
        .collect();
    Arc::new(writer.write_sorted(&records).unwrap())
}

pub fn table_from(writer: &SsTableWriter, records: &[Record]) -> Arc<SsTable> {
    Arc::new(writer.write_sorted(records).unwrap())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
