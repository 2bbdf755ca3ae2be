use super::helpers::*;
use crate::*;
use anyhow::Result;
use config::Durability;
use record::Record;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tempfile::tempdir;

// --------------------- Recovery ---------------------

#[test]
fn unflushed_writes_replay_from_wal() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_small(dir.path())?;
        store.put("a", "1")?;
        store.put("b", "2")?;
        store.delete("a")?;
        assert_eq!(store.stats().tables, 0);
    }

    let store = open_small(dir.path())?;
    assert!(store.get("a").unwrap_err().is_not_found());
    assert_eq!(store.get("b")?, "2");
    assert_eq!(store.stats().memtable_entries, 2);
    Ok(())
}

#[test]
fn tables_are_reloaded() -> Result<()> {
    let dir = tempdir()?;
    let before = {
        let store = open_small(dir.path())?;
        for i in 0..100 {
            store.put(key(i), value(i))?;
        }
        store.force_flush()?;
        store.stats()
    };

    let store = open_small(dir.path())?;
    let after = store.stats();
    assert_eq!(after.tables, before.tables);
    assert_eq!(after.memtable_entries, 0);
    for i in 0..100 {
        assert_eq!(store.get(&key(i))?, value(i));
    }
    Ok(())
}

#[test]
fn wal_and_tables_combine() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_small(dir.path())?;
        for i in 0..12 {
            store.put(key(i), value(i))?;
        }
        // key0000 flushed, then shadowed by a WAL-only delete
        store.delete(key(0))?;
    }

    let store = open_small(dir.path())?;
    let stats = store.stats();
    assert_eq!(stats.tables, 1);
    assert_eq!(stats.memtable_entries, 5);
    assert!(store.get(&key(0)).unwrap_err().is_not_found());
    for i in 1..12 {
        assert_eq!(store.get(&key(i))?, value(i));
    }
    Ok(())
}

#[test]
fn table_ids_continue_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let next = {
        let store = open_small(dir.path())?;
        for i in 0..16 {
            store.put(key(i), value(i))?;
        }
        store.stats().next_table_id
    };

    let store = open_small(dir.path())?;
    assert!(store.stats().next_table_id >= next);
    for i in 16..24 {
        store.put(key(i), value(i))?;
    }
    assert_eq!(store.stats().tables, 3);
    for i in 0..24 {
        assert_eq!(store.get(&key(i))?, value(i));
    }
    Ok(())
}

#[test]
fn reopened_tables_are_rebucketed() -> Result<()> {
    let dir = tempdir()?;
    let before = {
        let store = open_small(dir.path())?;
        for i in 0..200 {
            store.put(key(i), value(i))?;
        }
        store.stats().levels
    };
    assert_eq!(before, vec![(0, 1), (1, 2), (2, 1)]);

    let store = open_small(dir.path())?;
    assert_eq!(store.stats().levels, before);
    for i in (0..200).step_by(7) {
        assert_eq!(store.get(&key(i))?, value(i));
    }
    Ok(())
}

#[test]
fn deleted_key_stays_deleted_when_tables_reload() -> Result<()> {
    let dir = tempdir()?;
    {
        let w = table_writer(dir.path());
        let filler = "v".repeat(10);
        let mut big = vec![Record::new(key(0), "v", TS)];
        big.extend((100..140).map(|i| Record::new(key(i), filler.clone(), TS)));
        table_from(&w, &big);
        let mut deleted = vec![Record::tombstone(key(0), TS + 1)];
        deleted.extend((1..10).map(|i| Record::new(key(i), filler.clone(), TS + 1)));
        table_from(&w, &deleted);
        for t in 0..3 {
            table_of(&w, 200 + t * 10, 10, 10, TS);
        }
    }

    // The small tables compact on open; the tombstone must outlive that.
    let store = open_small(dir.path())?;
    assert_eq!(store.stats().levels, vec![(0, 0), (1, 2)]);
    assert!(store.get(&key(0)).unwrap_err().is_not_found());
    assert_eq!(store.get(&key(5))?, "v".repeat(10));
    Ok(())
}

// --------------------- Leftover files ---------------------

#[test]
fn temporary_and_incomplete_files_are_removed() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_small(dir.path())?;
        store.put("a", "1")?;
        store.force_flush()?;
    }
    let tmp = dir.path().join("sst_7.data.tmp");
    let orphan_index = dir.path().join("sst_8.index");
    let orphan_bloom = dir.path().join("sst_8.bloom");
    fs::write(&tmp, b"partial")?;
    fs::write(&orphan_index, b"")?;
    fs::write(&orphan_bloom, b"")?;

    let store = open_small(dir.path())?;
    assert!(!tmp.exists());
    assert!(!orphan_index.exists());
    assert!(!orphan_bloom.exists());
    assert_eq!(store.get("a")?, "1");
    assert_eq!(store.stats().tables, 1);
    Ok(())
}

#[test]
fn data_file_without_index_fails_open() -> Result<()> {
    let dir = tempdir()?;
    let id = {
        let store = open_small(dir.path())?;
        store.put("a", "1")?;
        store.force_flush()?;
        let tables = store.inner.lock().buckets.all_tables();
        let table = &tables[0];
        fs::remove_file(&table.paths().index)?;
        table.id()
    };

    match DiskStore::open(small_config(dir.path())) {
        Err(StoreError::Table { id: bad, .. }) => assert_eq!(bad, id),
        other => panic!("expected a table error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn corrupt_table_fails_open() -> Result<()> {
    let dir = tempdir()?;
    let data = {
        let store = open_small(dir.path())?;
        for i in 0..8 {
            store.put(key(i), value(i))?;
        }
        let tables = store.inner.lock().buckets.all_tables();
        tables[0].paths().data.clone()
    };
    let mut raw = fs::read(&data)?;
    raw[20] ^= 0x01;
    fs::write(&data, &raw)?;

    assert!(matches!(
        DiskStore::open(small_config(dir.path())),
        Err(StoreError::Table { .. })
    ));
    Ok(())
}

#[test]
fn truncated_wal_tail_is_ignored() -> Result<()> {
    let dir = tempdir()?;
    {
        let store = open_small(dir.path())?;
        store.put("a", "1")?;
        store.put("b", "2")?;
    }
    // A frame cut off mid-header, as left by a crash during append.
    let mut wal = OpenOptions::new()
        .append(true)
        .open(small_config(dir.path()).wal_path())?;
    wal.write_all(&[0u8, 1, 2, 3])?;
    drop(wal);

    let store = open_small(dir.path())?;
    assert_eq!(store.get("a")?, "1");
    assert_eq!(store.get("b")?, "2");
    Ok(())
}

#[test]
fn writes_after_torn_wal_tail_survive_next_restart() -> Result<()> {
    let dir = tempdir()?;
    let mut config = small_config(dir.path());
    config.wal.durability = Durability::Sync;
    {
        let store = DiskStore::open(config.clone())?;
        store.put("a", "1")?;
    }
    let mut wal = OpenOptions::new().append(true).open(config.wal_path())?;
    wal.write_all(&[0u8, 1, 2, 3, 4, 0, 9, 9])?;
    drop(wal);

    {
        let store = DiskStore::open(config.clone())?;
        assert_eq!(store.get("a")?, "1");
        store.put("b", "2")?;
    }

    let store = DiskStore::open(config)?;
    assert_eq!(store.get("a")?, "1");
    assert_eq!(store.get("b")?, "2");
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let mut config = small_config(dir.path());
    config.flush_threshold = 0;
    assert!(matches!(DiskStore::open(config), Err(StoreError::Config(_))));
}
