//! End-to-end scenarios against a `tempfile::tempdir()`-backed database,
//! exercising the durability, delete, reopen, checkpoint, bulk-load, and
//! crash-recovery properties described alongside the storage engine.

use pagedb::{Config, Database};
use tempfile::tempdir;

const RECORDS: &[(&str, &str)] = &[
    ("name", "jeff"),
    ("age", "38"),
    ("faith", "yes"),
    ("barnyard", "chickens"),
    ("goose", "egg"),
];

fn assert_records_present(t: &pagedb::Table, pairs: &[(&str, &str)]) {
    for (k, v) in pairs {
        assert_eq!(
            t.get(None, k.as_bytes()).unwrap().as_deref(),
            Some(v.as_bytes())
        );
        assert!(t.exists(None, k.as_bytes()).unwrap());
    }
}

fn assert_records_absent(t: &pagedb::Table, keys: &[&str]) {
    for k in keys {
        assert_eq!(t.get(None, k.as_bytes()).unwrap(), None);
        assert!(!t.exists(None, k.as_bytes()).unwrap());
    }
}

/// S1: create DB and table, put five keys in one transaction, commit.
#[test]
fn s1_create_put_commit() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path(), Config::default()).unwrap();
    let t = db.create_table("test1").unwrap();

    let txn = db.txn_begin().unwrap();
    for (k, v) in RECORDS {
        t.put(Some(&txn), k.as_bytes(), v.as_bytes()).unwrap();
    }
    txn.commit(true).unwrap();

    assert_records_present(&t, RECORDS);
    assert_eq!(t.get(None, b"missing").unwrap(), None);
    assert!(!t.exists(None, b"missing").unwrap());
}

/// S2: continuing S1, delete two keys in a new transaction; the rest survive.
#[test]
fn s2_delete_some_keys() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path(), Config::default()).unwrap();
    let t = db.create_table("test1").unwrap();
    let txn = db.txn_begin().unwrap();
    for (k, v) in RECORDS {
        t.put(Some(&txn), k.as_bytes(), v.as_bytes()).unwrap();
    }
    txn.commit(true).unwrap();

    let txn2 = db.txn_begin().unwrap();
    t.delete(Some(&txn2), b"barnyard").unwrap();
    t.delete(Some(&txn2), b"goose").unwrap();
    txn2.commit(true).unwrap();

    assert_records_absent(&t, &["barnyard", "goose"]);
    assert_records_present(&t, &[("name", "jeff"), ("age", "38"), ("faith", "yes")]);
}

/// S3: close and reopen; S2's state must be identical.
#[test]
fn s3_reopen_preserves_state() {
    let dir = tempdir().unwrap();
    {
        let db = Database::create(dir.path(), Config::default()).unwrap();
        let t = db.create_table("test1").unwrap();
        let txn = db.txn_begin().unwrap();
        for (k, v) in RECORDS {
            t.put(Some(&txn), k.as_bytes(), v.as_bytes()).unwrap();
        }
        txn.commit(true).unwrap();

        let txn2 = db.txn_begin().unwrap();
        t.delete(Some(&txn2), b"barnyard").unwrap();
        t.delete(Some(&txn2), b"goose").unwrap();
        txn2.commit(true).unwrap();
    }

    let db = Database::open(dir.path(), Config::default()).unwrap();
    let t = db.table("test1").unwrap();
    assert_records_absent(&t, &["barnyard", "goose"]);
    assert_records_present(&t, &[("name", "jeff"), ("age", "38"), ("faith", "yes")]);
}

/// S4: checkpoint the reopened DB; queries stay the same, and a block file
/// now exists alongside a superseded log.
#[test]
fn s4_checkpoint_preserves_queries_and_writes_a_block() {
    let dir = tempdir().unwrap();
    {
        let db = Database::create(dir.path(), Config::default()).unwrap();
        let t = db.create_table("test1").unwrap();
        let txn = db.txn_begin().unwrap();
        for (k, v) in RECORDS {
            t.put(Some(&txn), k.as_bytes(), v.as_bytes()).unwrap();
        }
        txn.commit(true).unwrap();
        let txn2 = db.txn_begin().unwrap();
        t.delete(Some(&txn2), b"barnyard").unwrap();
        t.delete(Some(&txn2), b"goose").unwrap();
        txn2.commit(true).unwrap();
    }

    let db = Database::open(dir.path(), Config::default()).unwrap();
    assert!(db.checkpoint().unwrap());

    let t = db.table("test1").unwrap();
    assert_records_absent(&t, &["barnyard", "goose"]);
    assert_records_present(&t, &[("name", "jeff"), ("age", "38"), ("faith", "yes")]);

    let has_block = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().starts_with("block."));
    assert!(has_block, "checkpoint should have produced at least one block file");
}

/// S5: bulk load 10,000 keys across two transactions, checkpoint, then read
/// back 1,000 of them (every 10th key) and confirm block size bounds.
#[test]
fn s5_bulk_load_then_random_reads() {
    let dir = tempdir().unwrap();
    let db = Database::create(dir.path(), Config::default()).unwrap();
    let t = db.create_table("bulk").unwrap();

    let value = "x".repeat(200);
    let keys: Vec<String> = (0..10_000).map(|i| format!("key{i:06}")).collect();

    let txn1 = db.txn_begin().unwrap();
    for k in &keys[..5_000] {
        t.put(Some(&txn1), k.as_bytes(), value.as_bytes()).unwrap();
    }
    txn1.commit(true).unwrap();

    let txn2 = db.txn_begin().unwrap();
    for k in &keys[5_000..] {
        t.put(Some(&txn2), k.as_bytes(), value.as_bytes()).unwrap();
    }
    txn2.commit(true).unwrap();

    assert!(db.checkpoint().unwrap());

    for i in (0..10_000).step_by(10) {
        let k = &keys[i];
        assert_eq!(
            t.get(None, k.as_bytes()).unwrap().as_deref(),
            Some(value.as_bytes())
        );
    }

    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("block.") {
            let len = entry.metadata().unwrap().len();
            assert!(len >= 1024, "{name} is only {len} bytes, below the 1 KiB floor");
            assert!(len <= 16 * 1024 * 1024, "{name} is {len} bytes, above the 16 MiB ceiling");
        }
    }
}

/// S6: truncate the most recent WAL segment's last frame by one byte, then
/// reopen; recovery must succeed and drop exactly the partial transaction.
#[test]
fn s6_truncated_wal_tail_drops_only_the_partial_txn() {
    let dir = tempdir().unwrap();
    {
        let db = Database::create(dir.path(), Config::default()).unwrap();
        let t = db.create_table("t").unwrap();
        let txn = db.txn_begin().unwrap();
        t.put(Some(&txn), b"a", b"1").unwrap();
        txn.commit(true).unwrap();

        // a second transaction that we are about to truncate away
        let txn2 = db.txn_begin().unwrap();
        t.put(Some(&txn2), b"b", b"2").unwrap();
        txn2.commit(true).unwrap();
    }

    let log_path = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .find(|e| e.file_name().to_string_lossy().starts_with("log."))
        .expect("a WAL segment should exist")
        .path();
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes.truncate(bytes.len() - 1);
    std::fs::write(&log_path, bytes).unwrap();

    let db = Database::open(dir.path(), Config::default()).unwrap();
    let t = db.table("t").unwrap();
    assert_eq!(t.get(None, b"a").unwrap().as_deref(), Some(&b"1"[..]));
    assert_eq!(t.get(None, b"b").unwrap(), None);
}
