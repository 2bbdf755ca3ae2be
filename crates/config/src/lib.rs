//! # Config - StrataKV store configuration
//!
//! A [`StoreConfig`] carries every tunable the storage engine reads: where the
//! files live, when the memtable flushes, how the WAL syncs, how tables are
//! indexed, and how size-tiered compaction groups tables.
//!
//! Defaults suit small embedded deployments. Every field can be overridden from
//! the environment with [`StoreConfig::from_env`]:
//!
//! ```text
//! STRATA_DATA_DIR          data directory                 (default: "data")
//! STRATA_FLUSH_KB          memtable flush threshold, KiB  (default: 4096)
//! STRATA_WAL_SYNC          fsync every WAL append         (default: "true")
//! STRATA_WAL_BATCH_KB      batch size when sync is off    (default: 3072)
//! STRATA_SPARSE_INTERVAL   records per sparse index entry (default: 100)
//! STRATA_BLOOM_FPR         bloom false-positive rate      (default: 0.01)
//! STRATA_MIN_TABLE_SIZE    smallest bucketed table, bytes (default: 3000)
//! STRATA_BUCKET_LOW        bucket admission low factor    (default: 0.5)
//! STRATA_BUCKET_HIGH       bucket admission high factor   (default: 1.5)
//! STRATA_COMPACTION_MIN    tables that trigger compaction (default: 4)
//! STRATA_COMPACTION_MAX    most tables merged at once     (default: 12)
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Default memtable flush threshold (4 MiB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;
/// Default WAL batch size used by [`Durability::Batched`] (3 MiB).
pub const DEFAULT_WAL_BATCH_BYTES: usize = 3 * 1024 * 1024;
pub const DEFAULT_WAL_FILE: &str = "wal.log";

const ENV_PREFIX: &str = "STRATA_";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the engine cannot run with.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },
}

/// How the write-ahead log makes appends durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Write and fsync every append before it is acknowledged.
    Sync,
    /// Buffer appends in memory; write and fsync once `threshold_bytes`
    /// accumulate. A crash loses at most the unwritten batch.
    Batched { threshold_bytes: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalConfig {
    /// File name inside the data directory.
    pub file_name: String,
    pub durability: Durability,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_WAL_FILE.to_string(),
            durability: Durability::Sync,
        }
    }
}

/// SSTable construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableConfig {
    /// Every Nth record gets a sparse index entry.
    pub sparse_interval: usize,
    pub bloom_fpr: f64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            sparse_interval: 100,
            bloom_fpr: 0.01,
        }
    }
}

/// Size-tiered compaction parameters shared by every bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionConfig {
    /// Tables smaller than this many bytes never define a bucket's size band.
    pub min_table_size: u64,
    pub bucket_low: f64,
    pub bucket_high: f64,
    /// Compaction runs once a bucket holds at least this many tables...
    pub min_threshold: usize,
    /// ...and at most this many.
    pub max_threshold: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_table_size: 3000,
            bucket_low: 0.5,
            bucket_high: 1.5,
            min_threshold: 4,
            max_threshold: 12,
        }
    }
}

/// Top-level configuration for a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Memtable size in bytes at which it is frozen and flushed.
    pub flush_threshold: usize,
    pub wal: WalConfig,
    pub table: TableConfig,
    pub compaction: CompactionConfig,
}

impl StoreConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            wal: WalConfig::default(),
            table: TableConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }

    /// Loads the configuration from `STRATA_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup, so the
    /// environment can be substituted in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let data_dir = env.string("DATA_DIR").unwrap_or_else(|| "data".to_string());
        let mut cfg = Self::new(data_dir);

        if let Some(kb) = env.parse::<usize>("FLUSH_KB")? {
            cfg.flush_threshold = kb.saturating_mul(1024);
        }

        let sync = env.parse::<bool>("WAL_SYNC")?.unwrap_or(true);
        let batch_kb = env.parse::<usize>("WAL_BATCH_KB")?;
        cfg.wal.durability = if sync {
            Durability::Sync
        } else {
            Durability::Batched {
                threshold_bytes: batch_kb
                    .map(|kb| kb.saturating_mul(1024))
                    .unwrap_or(DEFAULT_WAL_BATCH_BYTES),
            }
        };

        if let Some(v) = env.parse("SPARSE_INTERVAL")? {
            cfg.table.sparse_interval = v;
        }
        if let Some(v) = env.parse("BLOOM_FPR")? {
            cfg.table.bloom_fpr = v;
        }
        if let Some(v) = env.parse("MIN_TABLE_SIZE")? {
            cfg.compaction.min_table_size = v;
        }
        if let Some(v) = env.parse("BUCKET_LOW")? {
            cfg.compaction.bucket_low = v;
        }
        if let Some(v) = env.parse("BUCKET_HIGH")? {
            cfg.compaction.bucket_high = v;
        }
        if let Some(v) = env.parse("COMPACTION_MIN")? {
            cfg.compaction.min_threshold = v;
        }
        if let Some(v) = env.parse("COMPACTION_MAX")? {
            cfg.compaction.max_threshold = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::Invalid("flush_threshold must be > 0".into()));
        }
        if self.wal.file_name.is_empty() {
            return Err(ConfigError::Invalid("wal file name must not be empty".into()));
        }
        if let Durability::Batched { threshold_bytes: 0 } = self.wal.durability {
            return Err(ConfigError::Invalid("wal batch threshold must be > 0".into()));
        }
        if self.table.sparse_interval == 0 {
            return Err(ConfigError::Invalid("sparse_interval must be > 0".into()));
        }
        if !(self.table.bloom_fpr > 0.0 && self.table.bloom_fpr < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "bloom_fpr must be in (0, 1), got {}",
                self.table.bloom_fpr
            )));
        }
        self.compaction.validate()
    }

    /// Full path of the write-ahead log.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(&self.wal.file_name)
    }
}

impl CompactionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = self;
        if !(c.bucket_low > 0.0 && c.bucket_low <= 1.0 && c.bucket_high >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "bucket band must satisfy 0 < low <= 1 <= high, got [{}, {}]",
                c.bucket_low, c.bucket_high
            )));
        }
        if c.min_threshold < 2 {
            return Err(ConfigError::Invalid(
                "compaction min_threshold must be >= 2".into(),
            ));
        }
        if c.max_threshold < c.min_threshold {
            return Err(ConfigError::Invalid(format!(
                "compaction max_threshold {} is below min_threshold {}",
                c.max_threshold, c.min_threshold
            )));
        }
        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        let var = format!("{ENV_PREFIX}{name}");
        let value = (self.lookup)(&var)?;
        debug!(%var, %value, "config override");
        Some(value)
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.string(name) else {
            return Ok(None);
        };
        raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Env {
            var: format!("{ENV_PREFIX}{name}"),
            value: raw.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests;
