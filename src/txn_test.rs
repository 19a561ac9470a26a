use super::*;
use crate::{Db, Error, Options};

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("kivik-txn-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    for item in std::fs::read_dir(&dir).unwrap() {
        std::fs::remove_file(item.unwrap().path()).ok();
    }
    dir
}

fn open(name: &str) -> Db {
    Db::open(Options::new(scratch_dir(name))).unwrap()
}

#[test]
fn test_put_commit_then_get() {
    let db = open("put-get");
    db.update(|tx| tx.put(b"b1", b"k1", b"v1", 0)).unwrap();
    db.view(|tx| {
        let e = tx.get(b"b1", b"k1").unwrap();
        assert_eq!(e.value, b"v1");
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_update_rolls_back_on_callback_error() {
    let db = open("rollback-on-err");
    let result: Result<()> = db.update(|tx| {
        tx.put(b"b1", b"k1", b"v1", 0)?;
        err_at!(InvalidArgument, msg: "caller decided to abort")
    });
    assert!(result.is_err());
    db.view(|tx| {
        assert!(tx.get(b"b1", b"k1").is_err());
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_explicit_rollback_discards_buffer() {
    let db = open("rollback-explicit");
    let mut tx = db.begin(true).unwrap();
    tx.put(b"b1", b"k1", b"v1", 0).unwrap();
    tx.rollback();

    db.view(|tx| {
        assert!(tx.get(b"b1", b"k1").is_err());
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_read_only_transaction_rejects_writes() {
    let db = open("readonly-rejects");
    let mut tx = db.begin(false).unwrap();
    assert!(matches!(tx.put(b"b1", b"k1", b"v1", 0), Err(Error::ReadOnly(_, _))));
    assert!(matches!(tx.delete(b"b1", b"k1"), Err(Error::ReadOnly(_, _))));
}

#[test]
fn test_delete_requires_visible_entry() {
    let db = open("delete-requires-entry");
    let mut tx = db.begin(true).unwrap();
    assert!(tx.delete(b"b1", b"missing").is_err());
    tx.rollback();
}

#[test]
fn test_delete_then_get_not_found() {
    let db = open("delete-then-get");
    db.update(|tx| tx.put(b"b1", b"k1", b"v1", 0)).unwrap();
    db.update(|tx| tx.delete(b"b1", b"k1")).unwrap();
    db.view(|tx| {
        assert!(tx.get(b"b1", b"k1").is_err());
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_buffered_write_shadows_snapshot_within_same_transaction() {
    let db = open("buffer-shadows");
    db.update(|tx| tx.put(b"b1", b"k1", b"v1", 0)).unwrap();

    db.update(|tx| {
        tx.put(b"b1", b"k1", b"v2", 0)?;
        let e = tx.get(b"b1", b"k1")?;
        assert_eq!(e.value, b"v2");
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_reader_snapshot_is_unaffected_by_later_commit() {
    let db = open("reader-snapshot");
    db.update(|tx| tx.put(b"b1", b"k1", b"v1", 0)).unwrap();

    let reader = db.begin(false).unwrap();
    assert_eq!(reader.get(b"b1", b"k1").unwrap().value, b"v1");

    db.update(|tx| tx.put(b"b1", b"k1", b"v2", 0)).unwrap();

    // The already-open reader still observes its own snapshot.
    assert_eq!(reader.get(b"b1", b"k1").unwrap().value, b"v1");

    db.view(|tx| {
        assert_eq!(tx.get(b"b1", b"k1").unwrap().value, b"v2");
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_range_scan_merges_buffer_over_snapshot() {
    let db = open("range-scan-merge");
    db.update(|tx| {
        for k in ["a", "b", "d"] {
            tx.put(b"b1", k.as_bytes(), b"v", 0)?;
        }
        Ok(())
    })
    .unwrap();

    db.update(|tx| {
        tx.put(b"b1", b"c", b"v", 0)?; // new key inside the range
        tx.delete(b"b1", b"b")?; // shadow a snapshot key
        let got = tx.range_scan(b"b1", b"a", b"d");
        let keys: Vec<_> = got.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_prefix_scan_merges_buffer_over_snapshot() {
    let db = open("prefix-scan-merge");
    db.update(|tx| {
        tx.put(b"b1", b"app", b"v", 0)?;
        tx.put(b"b1", b"apple", b"v", 0)?;
        Ok(())
    })
    .unwrap();

    db.update(|tx| {
        tx.put(b"b1", b"apricot", b"v", 0)?;
        let got = tx.prefix_scan(b"b1", b"ap", 0);
        let keys: Vec<_> = got.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"app".to_vec(), b"apple".to_vec(), b"apricot".to_vec()]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_transaction_closed_after_commit() {
    let db = open("closed-after-commit");
    let mut tx = db.begin(true).unwrap();
    tx.put(b"b1", b"k1", b"v1", 0).unwrap();
    tx.commit().unwrap();

    assert!(matches!(tx.put(b"b1", b"k2", b"v2", 0), Err(Error::TransactionClosed(_, _))));
    assert!(matches!(tx.get(b"b1", b"k1"), Err(Error::TransactionClosed(_, _))));
    assert!(matches!(tx.delete(b"b1", b"k1"), Err(Error::TransactionClosed(_, _))));
    assert!(matches!(tx.commit(), Err(Error::TransactionClosed(_, _))));
    tx.rollback(); // closed rollback is a documented no-op, not an error
}

#[test]
fn test_writer_lock_serializes_concurrent_writers() {
    let db = std::sync::Arc::new(open("serialize-writers"));
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    let db1 = db.clone();
    let handle = std::thread::spawn(move || {
        let mut tx = db1.begin(true).unwrap();
        tx.put(b"b1", b"k1", b"v1", 0).unwrap();
        ready_tx.send(()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(60));
        tx.commit().unwrap();
    });

    ready_rx.recv().unwrap();
    let started = std::time::Instant::now();
    let mut tx2 = db.begin(true).unwrap(); // blocks until the first tx commits/drops
    assert!(started.elapsed() >= std::time::Duration::from_millis(30));
    tx2.put(b"b1", b"k1", b"v2", 0).unwrap();
    tx2.commit().unwrap();

    handle.join().unwrap();

    db.view(|tx| {
        assert_eq!(tx.get(b"b1", b"k1").unwrap().value, b"v2");
        Ok(())
    })
    .unwrap();
}
