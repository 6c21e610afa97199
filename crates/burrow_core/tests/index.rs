//! Secondary-index maintenance scenarios.

use burrow_core::{
    Collatable, Collection, CollectionSnapshot, CollectionTransaction, Database,
    DatabaseOptions, Index, IndexerFn, Item,
};
use std::sync::Arc;
use tempfile::tempdir;

fn open_db(dir: &tempfile::TempDir) -> Database {
    Database::open(&dir.path().join("db"), DatabaseOptions::default()).unwrap()
}

/// Indexer emitting the length of each value as a collatable integer.
fn length_indexer() -> IndexerFn {
    Arc::new(|value, emit| {
        let mut key = Collatable::new();
        key.add_i64(value.len() as i64);
        emit.emit(&key);
    })
}

fn seed(db: &Database) -> Arc<Collection> {
    let stuff = db.collection("stuff").unwrap();
    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    view.put("foo", "I am the value of foo").unwrap();
    view.put("splat", "I am splat's value").unwrap();
    drop(view);
    txn.commit().unwrap();
    stuff
}

/// Reads the whole index as `(emitted_int, source_key)` pairs, in index
/// order.
fn dump(db: &Database, index: &Index) -> Vec<(i64, String)> {
    let snap = db.begin_snapshot().unwrap();
    let view = index.with(&snap).unwrap();
    view.pairs()
        .unwrap()
        .map(|(key, value)| {
            let emitted = Collatable::items_in(key.as_bytes())
                .next()
                .and_then(|item| item.as_i64())
                .unwrap();
            let source = match Collatable::items_in(value.as_bytes()).next() {
                Some(Item::Bytes(bytes)) => String::from_utf8(bytes.to_vec()).unwrap(),
                other => panic!("unexpected source key item: {other:?}"),
            };
            (emitted, source)
        })
        .collect()
}

#[test]
fn fresh_index_rebuilds_from_source() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = seed(&db);

    let lengths = db.open_index(&stuff, "lengths", length_indexer()).unwrap();
    assert_eq!(lengths.entry_count().unwrap(), 2);
    assert_eq!(
        dump(&db, &lengths),
        vec![(18, "splat".into()), (21, "foo".into())]
    );

    // The backing collection uses the documented naming scheme.
    assert!(db
        .get_collection("index::stuff::lengths")
        .unwrap()
        .is_some());
}

#[test]
fn index_tracks_writes_through_hooks() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = seed(&db);
    let lengths = db.open_index(&stuff, "lengths", length_indexer()).unwrap();

    let major_general = "I am the very model of a modern Major General.";
    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    assert!(view.update("foo", "bar").unwrap());
    view.put("longer", major_general).unwrap();
    assert!(view.del("splat").unwrap());
    drop(view);
    txn.commit().unwrap();

    assert_eq!(
        dump(&db, &lengths),
        vec![
            (3, "foo".into()),
            (major_general.len() as i64, "longer".into())
        ]
    );
    assert_eq!(major_general.len(), 46);
    let updates = lengths.update_count();
    assert_eq!(updates, 3);

    // A redundant update (same bytes) does not touch the index.
    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    assert!(view.update("foo", "bar").unwrap());
    drop(view);
    txn.commit().unwrap();
    assert_eq!(lengths.update_count(), updates);
}

#[test]
fn index_reflects_only_committed_state() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = seed(&db);
    let lengths = db.open_index(&stuff, "lengths", length_indexer()).unwrap();
    let before = dump(&db, &lengths);

    {
        let txn = db.begin_transaction().unwrap();
        let view = CollectionTransaction::new(&stuff, &txn).unwrap();
        view.put("doomed", "this write never commits").unwrap();
        view.del("foo").unwrap();
        drop(view);
        txn.abort();
    }

    assert_eq!(dump(&db, &lengths), before);
}

#[test]
fn index_entries_match_source_exactly() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = db.collection("stuff").unwrap();
    let lengths = db.open_index(&stuff, "lengths", length_indexer()).unwrap();

    // A pile of inserts, updates, and deletes across two transactions.
    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    for i in 0..20usize {
        view.put(&format!("key-{i:02}"), &"x".repeat(i + 1)).unwrap();
    }
    drop(view);
    txn.commit().unwrap();

    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    for i in 0..10usize {
        view.update(&format!("key-{i:02}"), &"y".repeat(50 + i)).unwrap();
    }
    for i in 15..20usize {
        view.del(&format!("key-{i:02}")).unwrap();
    }
    drop(view);
    txn.commit().unwrap();

    // Expected: every (len(value), key) pair from the current source.
    let snap = db.begin_snapshot().unwrap();
    let source_view = CollectionSnapshot::new(&stuff, &snap).unwrap();
    let mut expected: Vec<(i64, String)> = source_view
        .pairs()
        .unwrap()
        .map(|(k, v)| (v.len() as i64, k.as_str().unwrap().to_string()))
        .collect();
    expected.sort();

    let mut actual = dump(&db, &lengths);
    actual.sort();
    assert_eq!(actual, expected);
}

#[test]
fn reopened_index_is_not_rebuilt_redundantly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open(&path, DatabaseOptions::default()).unwrap();
        let stuff = seed(&db);
        let lengths = db.open_index(&stuff, "lengths", length_indexer()).unwrap();
        assert_eq!(lengths.entry_count().unwrap(), 2);
        db.close().unwrap();
    }

    {
        let db = Database::open(&path, DatabaseOptions::default()).unwrap();
        let stuff = db.collection("stuff").unwrap();
        // The backing collection already exists, so open_index adopts it.
        let backing = db.get_collection("index::stuff::lengths").unwrap().unwrap();
        assert!(backing.is_initialized());

        let lengths = db.open_index(&stuff, "lengths", length_indexer()).unwrap();
        assert_eq!(lengths.entry_count().unwrap(), 2);
        assert_eq!(
            dump(&db, &lengths),
            vec![(18, "splat".into()), (21, "foo".into())]
        );

        // Hooks keep working after reopen.
        let txn = db.begin_transaction().unwrap();
        let view = CollectionTransaction::new(&stuff, &txn).unwrap();
        view.put("third", "123456789").unwrap();
        drop(view);
        txn.commit().unwrap();
        assert_eq!(lengths.entry_count().unwrap(), 3);
    }
}

#[test]
fn deleted_index_breaks_its_hook() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = seed(&db);
    let lengths = db.open_index(&stuff, "lengths", length_indexer()).unwrap();
    assert_eq!(lengths.entry_count().unwrap(), 2);

    db.delete_index(lengths).unwrap();
    assert!(db
        .get_collection("index::stuff::lengths")
        .unwrap()
        .is_none());

    // Source writes still work; the orphaned hook unregisters itself.
    let txn = db.begin_transaction().unwrap();
    let view = CollectionTransaction::new(&stuff, &txn).unwrap();
    view.put("after", "the index is gone").unwrap();
    drop(view);
    txn.commit().unwrap();

    let snap = db.begin_snapshot().unwrap();
    let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
    assert_eq!(view.get("after").unwrap(), "the index is gone");
}

#[test]
fn indexer_emissions_with_extra_payload() {
    let dir = tempdir().unwrap();
    let db = open_db(&dir);
    let stuff = seed(&db);

    // Emit (first_byte, extra = full length) per value.
    let indexer: IndexerFn = Arc::new(|value, emit| {
        let mut key = Collatable::new();
        key.add_i64(i64::from(value[0]));
        let mut extra = Collatable::new();
        extra.add_i64(value.len() as i64);
        emit.emit_with(&key, &extra);
    });
    let firsts = db.open_index(&stuff, "firsts", indexer).unwrap();

    let snap = db.begin_snapshot().unwrap();
    let view = firsts.with(&snap).unwrap();
    let rows: Vec<(i64, i64, String)> = view
        .pairs()
        .unwrap()
        .map(|(key, value)| {
            let first = Collatable::items_in(key.as_bytes())
                .next()
                .and_then(|i| i.as_i64())
                .unwrap();
            let mut items = Collatable::items_in(value.as_bytes());
            let len = items.next().and_then(|i| i.as_i64()).unwrap();
            let source = match items.next() {
                Some(Item::Bytes(bytes)) => String::from_utf8(bytes.to_vec()).unwrap(),
                other => panic!("unexpected item: {other:?}"),
            };
            (first, len, source)
        })
        .collect();

    // Both values start with 'I'; composite values sort by (extra, key).
    assert_eq!(
        rows,
        vec![
            (i64::from(b'I'), 18, "splat".into()),
            (i64::from(b'I'), 21, "foo".into()),
        ]
    );
}
