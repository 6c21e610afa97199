//! End-to-end collection scenarios: round trips, range scans, bounded
//! cursors, and duplicate keys.

use burrow_core::{
    CollectionOptions, CollectionSnapshot, CollectionTransaction, Database, DatabaseOptions,
    Datum, PutFlags, ValueSort,
};
use std::ops::Bound;
use tempfile::tempdir;

fn open_db(dir: &tempfile::TempDir) -> Database {
    Database::open(&dir.path().join("db"), DatabaseOptions::default()).unwrap()
}

/// Inserts `key-00` .. `key-99` with values `the value is 0.` ..
/// `the value is 99.`.
fn populate_hundred(db: &Database) -> std::sync::Arc<burrow_core::Collection> {
    let stuff = db.collection("stuff").unwrap();
    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    for i in 0..100 {
        let key = format!("key-{i:02}");
        let value = format!("the value is {i}.");
        view.put(&key, &value).unwrap();
    }
    drop(view);
    txn.commit().unwrap();
    stuff
}

#[test]
fn basic_round_trip() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = db.collection("stuff").unwrap();

    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    view.put("foo", "I am the value of foo").unwrap();
    view.put("splat", "I am splat's value").unwrap();
    drop(view);
    txn.commit().unwrap();

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
    assert_eq!(view.get("foo").unwrap(), "I am the value of foo");
    assert_eq!(view.get("splat").unwrap(), "I am splat's value");
    assert!(view.get("bogus").unwrap().is_nil());
    assert_eq!(view.entry_count().unwrap(), 2);
}

#[test]
fn range_query_forward_and_reverse() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = populate_hundred(&db);

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();

    let forward: Vec<(String, String)> = view
        .pairs()
        .unwrap()
        .map(|(k, v)| (k.as_str().unwrap().into(), v.as_str().unwrap().into()))
        .collect();
    assert_eq!(forward.len(), 100);
    assert_eq!(forward[0], ("key-00".into(), "the value is 0.".into()));
    assert_eq!(forward[99], ("key-99".into(), "the value is 99.".into()));
    assert!(forward.windows(2).all(|w| w[0].0 < w[1].0));

    let reverse: Vec<String> = view
        .pairs_reversed()
        .unwrap()
        .map(|(k, _)| k.as_str().unwrap().to_string())
        .collect();
    let mut expected: Vec<String> = forward.iter().map(|(k, _)| k.clone()).collect();
    expected.reverse();
    assert_eq!(reverse, expected);
}

#[test]
fn cursor_seek_and_step() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = populate_hundred(&db);

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
    let mut cursor = view.cursor().unwrap();

    assert!(cursor.seek("key").unwrap());
    assert_eq!(cursor.key(), "key-00");

    assert!(cursor.seek_exact("key-23").unwrap());
    assert_eq!(cursor.key(), "key-23");
    assert_eq!(cursor.value(), "the value is 23.");

    assert!(cursor.prev());
    assert_eq!(cursor.key(), "key-22");

    assert!(!cursor.seek("key-999").unwrap());
    assert!(!cursor.has_value());
}

#[test]
fn bounded_cursor_enumeration() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = populate_hundred(&db);

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();

    let count = |min: Bound<Datum<'_>>, max: Bound<Datum<'_>>| {
        let mut cursor = view.range(min, max).unwrap();
        let mut n = 0;
        while cursor.next() {
            n += 1;
        }
        n
    };

    assert_eq!(
        count(
            Bound::Included(Datum::from("key-10")),
            Bound::Included(Datum::from("key-20"))
        ),
        11
    );
    assert_eq!(
        count(
            Bound::Excluded(Datum::from("key-10")),
            Bound::Excluded(Datum::from("key-20"))
        ),
        9
    );
    assert_eq!(
        count(
            Bound::Included(Datum::from("key-20")),
            Bound::Included(Datum::from("key-10"))
        ),
        0
    );
    assert_eq!(
        count(
            Bound::Included(Datum::from("a")),
            Bound::Included(Datum::from("z"))
        ),
        100
    );
}

#[test]
fn bounded_cursor_reverse_matches_forward() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = populate_hundred(&db);

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();

    let mut forward = Vec::new();
    let mut cursor = view
        .range(
            Bound::Included(Datum::from("key-10")),
            Bound::Excluded(Datum::from("key-20")),
        )
        .unwrap();
    while cursor.next() {
        forward.push(cursor.key().to_vec());
    }

    let mut backward = Vec::new();
    let mut cursor = view
        .range(
            Bound::Included(Datum::from("key-10")),
            Bound::Excluded(Datum::from("key-20")),
        )
        .unwrap();
    while cursor.prev() {
        backward.push(cursor.key().to_vec());
    }
    backward.reverse();

    assert_eq!(forward, backward);
    assert_eq!(forward.len(), 10);
}

#[test]
fn duplicate_keys_with_integer_values() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let dups = db
        .open_collection(
            "dups",
            CollectionOptions::new().value_sort(ValueSort::Integer),
        )
        .unwrap();

    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&dups, &txn).unwrap();
    for i in 0..100 {
        let key = format!("key-{i:02}");
        for v in 1..=10u32 {
            assert!(view
                .put_with_flags(&key, v, PutFlags::upsert().no_dup_data(true))
                .unwrap());
        }
    }
    drop(view);
    txn.commit().unwrap();

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&dups, &snap).unwrap();
    assert_eq!(view.entry_count().unwrap(), 1000);

    let mut cursor = view.cursor().unwrap();
    assert!(cursor.seek_exact("key-42").unwrap());
    assert_eq!(cursor.value_count(), 10);

    // next_dup walks the values in ascending order.
    let mut values = vec![cursor.value().as_u32().unwrap()];
    while cursor.next_dup() {
        values.push(cursor.value().as_u32().unwrap());
    }
    assert_eq!(values, (1..=10).collect::<Vec<u32>>());

    // next_key skips to the next key's first value.
    assert!(cursor.next_key());
    assert_eq!(cursor.key(), "key-43");
    assert_eq!(cursor.value().as_u32().unwrap(), 1);
}

#[test]
fn bulk_duplicate_put() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let dups = db
        .open_collection(
            "dups",
            CollectionOptions::new().value_sort(ValueSort::Integer),
        )
        .unwrap();

    let mut data = Vec::new();
    for v in [5u32, 1, 9, 3] {
        data.extend_from_slice(&v.to_ne_bytes());
    }

    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&dups, &txn).unwrap();
    let stored = view
        .put_duplicates("k", &data, 4, PutFlags::upsert())
        .unwrap();
    assert_eq!(stored, 4);
    drop(view);
    txn.commit().unwrap();

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&dups, &snap).unwrap();
    let mut cursor = view.cursor().unwrap();
    assert!(cursor.first());
    let mut values = vec![cursor.value().as_u32().unwrap()];
    while cursor.next_dup() {
        values.push(cursor.value().as_u32().unwrap());
    }
    assert_eq!(values, vec![1, 3, 5, 9]);
}

#[test]
fn aborted_transaction_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = db.collection("stuff").unwrap();

    {
        let txn = db.begin_transaction().unwrap();
        let view = CollectionTransaction::new(&stuff, &txn).unwrap();
        view.put("k", "v").unwrap();
        drop(view);
        txn.abort();
    }

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
    assert!(view.get("k").unwrap().is_nil());
    assert_eq!(view.entry_count().unwrap(), 0);
}

#[test]
fn snapshot_pins_its_state() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = db.collection("stuff").unwrap();

    let txn = db.begin_transaction().unwrap();
    CollectionTransaction::new(&stuff, &txn)
        .unwrap()
        .put("k", "one")
        .unwrap();
    txn.commit().unwrap();

    let snap = db.begin_snapshot().unwrap();
    let pinned = CollectionSnapshot::new(&stuff, &snap).unwrap();

    let txn = db.begin_transaction().unwrap();
    CollectionTransaction::new(&stuff, &txn)
        .unwrap()
        .put("k", "two")
        .unwrap();
    txn.commit().unwrap();

    assert_eq!(pinned.get("k").unwrap(), "one");

    let fresh = db.begin_snapshot().unwrap();
    assert_eq!(
        CollectionSnapshot::new(&stuff, &fresh)
            .unwrap()
            .get("k")
            .unwrap(),
        "two"
    );
}

#[test]
fn data_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open(&path, DatabaseOptions::default()).unwrap();
        let stuff = db.collection("stuff").unwrap();
        let txn = db.begin_transaction().unwrap();
        CollectionTransaction::new(&stuff, &txn)
            .unwrap()
            .put("foo", "bar")
            .unwrap();
        txn.commit().unwrap();
        db.close().unwrap();
    }

    {
        let db = Database::open(&path, DatabaseOptions::default()).unwrap();
        let stuff = db.collection("stuff").unwrap();
        let snap = db.begin_snapshot().unwrap();
        let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
        assert_eq!(view.get("foo").unwrap(), "bar");
    }
}

#[test]
fn copy_to_produces_a_working_database() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    populate_hundred(&db);
    let copy_path = dir.path().join("copy");
    db.copy_to(&copy_path, true).unwrap();
    db.close().unwrap();

    let copy = Database::open(&copy_path, DatabaseOptions::default()).unwrap();
    let stuff = copy.collection("stuff").unwrap();
    let snap = copy.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
    assert_eq!(view.entry_count().unwrap(), 100);
    assert_eq!(view.get("key-07").unwrap(), "the value is 7.");
}

#[test]
fn second_open_is_locked_and_destroy_respects_use() {
    use burrow_core::{Error, RemoveMode};

    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let db = Database::open(&path, DatabaseOptions::default()).unwrap();

    assert!(matches!(
        Database::open(&path, DatabaseOptions::default()),
        Err(Error::Locked)
    ));
    assert!(matches!(
        Database::destroy(&path, RemoveMode::RequireUnused),
        Err(Error::Locked)
    ));

    db.close().unwrap();
    drop(db);
    Database::destroy(&path, RemoveMode::RequireUnused).unwrap();
    assert!(!path.exists());
}

#[test]
fn checkpoint_truncates_the_log() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    populate_hundred(&db);

    assert!(db.stats().unwrap().engine.log_bytes > 0);
    db.checkpoint().unwrap();
    assert_eq!(db.stats().unwrap().engine.log_bytes, 0);

    // Data is intact afterwards.
    let stuff = db.collection("stuff").unwrap();
    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
    assert_eq!(view.entry_count().unwrap(), 100);
}

#[test]
fn statistics_count_operations() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = db.collection("stuff").unwrap();

    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    view.put("a", "1").unwrap();
    view.put("b", "2").unwrap();
    view.get("a").unwrap();
    view.del("b").unwrap();
    drop(view);
    txn.commit().unwrap();

    let stats = db.stats().unwrap();
    assert_eq!(stats.counters.writes, 2);
    assert_eq!(stats.counters.deletes, 1);
    assert!(stats.counters.reads >= 1);
    assert_eq!(stats.counters.transactions_committed, 1);
    assert_eq!(stats.engine.entries, 1);
}
