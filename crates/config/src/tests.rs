use super::*;
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |k| map.get(k).cloned()
}

// -------------------- Defaults --------------------

#[test]
fn defaults_are_valid() {
    let cfg = StoreConfig::new("/tmp/x");
    cfg.validate().unwrap();
    assert_eq!(cfg.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
    assert_eq!(cfg.wal.durability, Durability::Sync);
    assert_eq!(cfg.table.sparse_interval, 100);
    assert_eq!(cfg.compaction.min_threshold, 4);
    assert_eq!(cfg.compaction.max_threshold, 12);
    assert_eq!(cfg.compaction.min_table_size, 3000);
    assert_eq!(cfg.wal_path(), PathBuf::from("/tmp/x/wal.log"));
}

#[test]
fn empty_environment_gives_defaults() {
    let cfg = StoreConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, StoreConfig::new("data"));
}

// -------------------- Environment --------------------

#[test]
fn env_overrides_fields() {
    let cfg = StoreConfig::from_lookup(lookup_from(&[
        ("STRATA_DATA_DIR", "/var/lib/strata"),
        ("STRATA_FLUSH_KB", "64"),
        ("STRATA_SPARSE_INTERVAL", "10"),
        ("STRATA_BLOOM_FPR", "0.05"),
        ("STRATA_COMPACTION_MIN", "2"),
        ("STRATA_COMPACTION_MAX", "3"),
    ]))
    .unwrap();

    assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/strata"));
    assert_eq!(cfg.flush_threshold, 64 * 1024);
    assert_eq!(cfg.table.sparse_interval, 10);
    assert_eq!(cfg.table.bloom_fpr, 0.05);
    assert_eq!(cfg.compaction.min_threshold, 2);
    assert_eq!(cfg.compaction.max_threshold, 3);
}

#[test]
fn wal_sync_false_selects_batched() {
    let cfg = StoreConfig::from_lookup(lookup_from(&[("STRATA_WAL_SYNC", "false")])).unwrap();
    assert_eq!(
        cfg.wal.durability,
        Durability::Batched {
            threshold_bytes: DEFAULT_WAL_BATCH_BYTES
        }
    );

    let cfg = StoreConfig::from_lookup(lookup_from(&[
        ("STRATA_WAL_SYNC", "false"),
        ("STRATA_WAL_BATCH_KB", "8"),
    ]))
    .unwrap();
    assert_eq!(
        cfg.wal.durability,
        Durability::Batched {
            threshold_bytes: 8192
        }
    );
}

#[test]
fn unparsable_env_value_is_an_error() {
    let err = StoreConfig::from_lookup(lookup_from(&[("STRATA_FLUSH_KB", "lots")])).unwrap_err();
    match err {
        ConfigError::Env { var, value, .. } => {
            assert_eq!(var, "STRATA_FLUSH_KB");
            assert_eq!(value, "lots");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn env_values_still_validated() {
    let err =
        StoreConfig::from_lookup(lookup_from(&[("STRATA_BLOOM_FPR", "1.5")])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

// -------------------- Validation --------------------

#[test]
fn rejects_zero_flush_threshold() {
    let mut cfg = StoreConfig::new("d");
    cfg.flush_threshold = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_inverted_thresholds() {
    let mut cfg = StoreConfig::new("d");
    cfg.compaction.min_threshold = 5;
    cfg.compaction.max_threshold = 4;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_band_that_excludes_the_average() {
    let mut cfg = StoreConfig::new("d");
    cfg.compaction.bucket_low = 1.2;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_zero_batch_threshold() {
    let mut cfg = StoreConfig::new("d");
    cfg.wal.durability = Durability::Batched { threshold_bytes: 0 };
    assert!(cfg.validate().is_err());
}
