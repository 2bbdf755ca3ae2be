use crate::*;
use config::TableConfig;
use record::Record;
use std::path::Path;
use std::sync::Arc;

pub const TS: u32 = 1_700_000_000;

pub fn writer(dir: &Path, sparse_interval: usize) -> SsTableWriter {
    SsTableWriter::new(
        dir,
        Arc::new(TableIds::default()),
        TableConfig {
            sparse_interval,
            bloom_fpr: 0.01,
        },
    )
}

/// `n` live records `key00000..` with values `val<i>`.
pub fn sequential(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(format!("key{:05}", i), format!("val{}", i), TS))
        .collect()
}
