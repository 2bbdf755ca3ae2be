use super::helpers::*;
use crate::*;
use anyhow::Result;
use record::Record;
use tempfile::tempdir;

fn manager(dir: &std::path::Path) -> BucketManager {
    BucketManager::new(table_writer(dir), params())
}

// -------------------- Placement --------------------

#[test]
fn similar_tables_share_level_zero() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    for t in 0..3 {
        m.insert_table(table_of(m.writer(), t * 10, 10, 10, TS))?;
    }
    assert_eq!(m.level_counts(), vec![(0, 3)]);
    assert_eq!(m.highest_level(), Some(0));
    Ok(())
}

#[test]
fn full_bucket_compacts_into_next_level() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    for t in 0..4 {
        m.insert_table(table_of(m.writer(), t * 10, 10, 10, TS))?;
    }
    assert_eq!(m.level_counts(), vec![(0, 0), (1, 1)]);
    assert_eq!(m.table_count(), 1);
    assert_eq!(count_data_files(dir.path()), 1);

    let merged = &m.bucket(1).unwrap().tables()[0];
    assert_eq!(merged.len(), 40);
    Ok(())
}

#[test]
fn compaction_cascades_through_levels() -> Result<()> {
    init_tracing();
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    for t in 0..16 {
        m.insert_table(table_of(m.writer(), t * 10, 10, 10, TS))?;
        for (_, count) in m.level_counts() {
            assert!(count < 4, "bucket left at the compaction threshold");
        }
    }
    assert_eq!(m.highest_level(), Some(2));
    assert_eq!(m.table_count(), 1);
    assert_eq!(m.bucket(2).unwrap().tables()[0].len(), 160);

    for i in 0..160 {
        let rec = m.retrieve_key(&key(i))?.expect("key lost in cascade");
        assert_eq!(rec.value().len(), 10);
    }
    Ok(())
}

#[test]
fn fresh_flush_lands_below_larger_tables() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    for t in 0..4 {
        m.insert_table(table_of(m.writer(), t * 10, 10, 10, TS))?;
    }
    m.insert_table(table_of(m.writer(), 100, 10, 10, TS))?;
    assert_eq!(m.level_counts(), vec![(0, 1), (1, 1)]);
    Ok(())
}

#[test]
fn oversized_table_is_promoted() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    m.insert_table(table_of(m.writer(), 0, 10, 10, TS))?;
    // 10x the level 0 average
    m.insert_table(table_of(m.writer(), 100, 100, 10, TS))?;
    assert_eq!(m.level_counts(), vec![(0, 1), (1, 1)]);
    Ok(())
}

#[test]
fn undersized_table_is_kept_not_dropped() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    m.insert_table(table_of(m.writer(), 0, 10, 10, TS))?;
    m.insert_table(table_of(m.writer(), 100, 1, 10, TS))?;
    assert_eq!(m.table_count(), 2);
    assert!(m.retrieve_key(&key(100))?.is_some());
    Ok(())
}

// -------------------- Reads --------------------

#[test]
fn retrieve_key_prefers_newest_timestamp() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    // The newer record sits in the older table.
    m.insert_table(table_from(m.writer(), &[Record::new("k", "new", TS + 10)]))?;
    m.insert_table(table_from(m.writer(), &[Record::new("k", "old", TS)]))?;

    assert_eq!(m.retrieve_key("k")?.unwrap().value(), "new");
    Ok(())
}

#[test]
fn retrieve_key_equal_timestamps_prefer_later_table() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    m.insert_table(table_from(m.writer(), &[Record::new("k", "first", TS)]))?;
    m.insert_table(table_from(m.writer(), &[Record::new("k", "second", TS)]))?;

    assert_eq!(m.retrieve_key("k")?.unwrap().value(), "second");
    Ok(())
}

#[test]
fn retrieve_key_returns_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    m.insert_table(table_from(m.writer(), &[Record::new("k", "v", TS)]))?;
    m.insert_table(table_from(m.writer(), &[Record::tombstone("k", TS + 1)]))?;

    assert!(m.retrieve_key("k")?.unwrap().is_tombstone());
    assert!(m.retrieve_key("missing")?.is_none());
    Ok(())
}

#[test]
fn snapshot_skips_tables_outside_key_range() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    m.insert_table(table_of(m.writer(), 0, 10, 10, TS))?;
    m.insert_table(table_of(m.writer(), 50, 10, 10, TS))?;

    let snap = m.snapshot(&key(55));
    assert_eq!(snap.len(), 1);
    assert_eq!(snap[0].min_key(), key(50));
    assert!(m.snapshot("zzz").is_empty());
    Ok(())
}

// -------------------- Manual compaction --------------------

#[test]
fn compact_all_merges_every_multi_table_level() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    m.insert_table(table_of(m.writer(), 0, 10, 10, TS))?;
    m.insert_table(table_of(m.writer(), 10, 10, 10, TS))?;
    assert_eq!(m.compact_all()?, 1);
    assert_eq!(m.level_counts(), vec![(0, 0), (1, 1)]);

    // A lone table per level is left alone.
    assert_eq!(m.compact_all()?, 0);
    Ok(())
}

#[test]
fn tombstone_shadowing_older_level_survives_until_merged_with_it() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());

    // Level 1: one merged table holding "key0000".
    for t in 0..4 {
        m.insert_table(table_of(m.writer(), t * 10, 10, 10, TS))?;
    }
    assert_eq!(m.level_counts(), vec![(0, 0), (1, 1)]);

    // Level 0 compaction with a tombstone for "key0000"; level 1 may still
    // hold the key, so the tombstone is kept.
    let mut first: Vec<Record> = vec![Record::tombstone(key(0), TS + 1)];
    first.extend((100..109).map(|i| Record::new(key(i), "v".repeat(10), TS)));
    m.insert_table(table_from(m.writer(), &first))?;
    for t in 1..4 {
        m.insert_table(table_of(m.writer(), 100 + t * 10, 10, 10, TS))?;
    }
    assert_eq!(m.level_counts(), vec![(0, 0), (1, 2)]);
    assert!(m.retrieve_key(&key(0))?.unwrap().is_tombstone());

    // Merging both level 1 tables reclaims the key entirely.
    assert_eq!(m.compact_all()?, 1);
    assert!(m.retrieve_key(&key(0))?.is_none());
    assert!(m.retrieve_key(&key(1))?.is_some());
    Ok(())
}

// -------------------- Equal timestamps --------------------

#[test]
fn merged_table_keeps_later_write_from_same_second_visible() -> Result<()> {
    let dir = tempdir()?;
    let mut m = manager(dir.path());
    let filler = "v".repeat(10);

    let mut older = vec![Record::new(key(0), "old", TS)];
    older.extend((1..10).map(|i| Record::new(key(i), filler.clone(), TS)));
    m.insert_table(table_from(m.writer(), &older))?;

    // Same second, but flushed later and large enough to land a level up.
    let mut newer = vec![Record::new(key(0), "new", TS)];
    newer.extend((100..140).map(|i| Record::new(key(i), filler.clone(), TS)));
    m.insert_table(table_from(m.writer(), &newer))?;
    assert_eq!(m.level_counts(), vec![(0, 1), (1, 1)]);
    assert_eq!(m.retrieve_key(&key(0))?.unwrap().value(), "new");

    for t in 0..3 {
        m.insert_table(table_of(m.writer(), 200 + t * 10, 10, 10, TS))?;
    }
    assert_eq!(m.level_counts(), vec![(0, 0), (1, 2)]);
    assert_eq!(m.retrieve_key(&key(0))?.unwrap().value(), "new");

    // The stale version was not carried into the merged table.
    let merged = m
        .all_tables()
        .into_iter()
        .max_by_key(|t| t.id())
        .unwrap();
    assert_eq!(merged.len(), 39);
    assert!(merged.scan()?.iter().all(|r| r.key() != key(0)));
    Ok(())
}

#[test]
fn restored_tables_see_each_other_before_compacting() -> Result<()> {
    let dir = tempdir()?;
    let w = table_writer(dir.path());
    let filler = "v".repeat(10);

    let mut big = vec![Record::new(key(0), "v", TS)];
    big.extend((100..140).map(|i| Record::new(key(i), filler.clone(), TS)));
    let big = table_from(&w, &big);
    let mut deleted = vec![Record::tombstone(key(0), TS + 1)];
    deleted.extend((1..10).map(|i| Record::new(key(i), filler.clone(), TS + 1)));
    let mut tables = vec![big, table_from(&w, &deleted)];
    for t in 0..3 {
        tables.push(table_of(&w, 200 + t * 10, 10, 10, TS));
    }

    let mut m = BucketManager::new(w, params());
    m.restore_tables(tables)?;
    assert_eq!(m.level_counts(), vec![(0, 0), (1, 2)]);
    assert!(m.retrieve_key(&key(0))?.unwrap().is_tombstone());
    Ok(())
}
