//! Scoped views: a (collection, snapshot-or-transaction) pair.
//!
//! All reads and mutations go through a scoped view. A view borrows from
//! its snapshot/transaction, and values returned by reads borrow from the
//! view's scope in turn, so nothing can outlive the transaction that
//! produced it.

use crate::collection::Collection;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::txn::{Snapshot, Transaction, TxnTag};
use burrow_engine::{
    Cursor as EngineCursor, Dbi, EngineError, EngineResult, RoTxn, RwTxn, TreeStat,
};
use std::sync::Arc;

/// Either side of the read API.
#[derive(Clone, Copy)]
pub(crate) enum ReadHandle<'s> {
    Snapshot(&'s RoTxn),
    Transaction(&'s RwTxn),
}

impl<'s> ReadHandle<'s> {
    pub(crate) fn get(&self, dbi: Dbi, key: &[u8]) -> EngineResult<Option<Arc<[u8]>>> {
        match self {
            ReadHandle::Snapshot(txn) => txn.get(dbi, key),
            ReadHandle::Transaction(txn) => txn.get(dbi, key),
        }
    }

    pub(crate) fn get_ge(
        &self,
        dbi: Dbi,
        key: &[u8],
    ) -> EngineResult<Option<(Arc<[u8]>, Arc<[u8]>)>> {
        match self {
            ReadHandle::Snapshot(txn) => txn.get_ge(dbi, key),
            ReadHandle::Transaction(txn) => txn.get_ge(dbi, key),
        }
    }

    pub(crate) fn entry_count(&self, dbi: Dbi) -> EngineResult<u64> {
        match self {
            ReadHandle::Snapshot(txn) => txn.entry_count(dbi),
            ReadHandle::Transaction(txn) => txn.entry_count(dbi),
        }
    }

    pub(crate) fn sequence(&self, dbi: Dbi) -> EngineResult<u64> {
        match self {
            ReadHandle::Snapshot(txn) => txn.sequence(dbi),
            ReadHandle::Transaction(txn) => txn.sequence(dbi),
        }
    }

    pub(crate) fn tree_stat(&self, dbi: Dbi) -> EngineResult<TreeStat> {
        match self {
            ReadHandle::Snapshot(txn) => txn.tree_stat(dbi),
            ReadHandle::Transaction(txn) => txn.tree_stat(dbi),
        }
    }

    pub(crate) fn cursor(&self, dbi: Dbi) -> EngineResult<EngineCursor> {
        match self {
            ReadHandle::Snapshot(txn) => txn.cursor(dbi),
            ReadHandle::Transaction(txn) => txn.cursor(dbi),
        }
    }
}

fn foreign_collection() -> Error {
    Error::Engine(EngineError::invalid_argument(
        "collection does not belong to this database",
    ))
}

/// A collection viewed through a snapshot (or the read side of a
/// transaction).
pub struct CollectionSnapshot<'s> {
    coll: Arc<Collection>,
    read: ReadHandle<'s>,
}

impl<'s> CollectionSnapshot<'s> {
    /// Pairs a collection with a snapshot.
    pub fn new(coll: &Arc<Collection>, snap: &'s Snapshot) -> Result<Self> {
        if !Arc::ptr_eq(&coll.db()?, snap.db()) {
            return Err(foreign_collection());
        }
        Ok(Self {
            coll: coll.clone(),
            read: ReadHandle::Snapshot(snap.engine()),
        })
    }

    /// Pairs a collection with the read side of a transaction, seeing the
    /// transaction's own writes.
    pub fn from_transaction(coll: &Arc<Collection>, txn: &'s Transaction) -> Result<Self> {
        if !Arc::ptr_eq(&coll.db()?, txn.db()) {
            return Err(foreign_collection());
        }
        Ok(Self {
            coll: coll.clone(),
            read: ReadHandle::Transaction(txn.engine()?),
        })
    }

    /// The underlying collection.
    #[must_use]
    pub fn collection(&self) -> &Arc<Collection> {
        &self.coll
    }

    pub(crate) fn read(&self) -> ReadHandle<'s> {
        self.read
    }

    pub(crate) fn dbi(&self) -> Dbi {
        self.coll.dbi()
    }

    /// Total number of values in the collection (duplicates counted).
    pub fn entry_count(&self) -> Result<u64> {
        Ok(self.read.entry_count(self.dbi())?)
    }

    /// The collection's sequence counter as of this view.
    pub fn last_sequence(&self) -> Result<u64> {
        Ok(self.read.sequence(self.dbi())?)
    }

    /// Per-collection statistics.
    pub fn stat(&self) -> Result<TreeStat> {
        Ok(self.read.tree_stat(self.dbi())?)
    }
}

impl std::fmt::Debug for CollectionSnapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSnapshot")
            .field("collection", &self.coll.name())
            .finish()
    }
}

/// A collection viewed through the read-write transaction.
///
/// Carries all mutation operations; reads see the transaction's own
/// uncommitted writes.
pub struct CollectionTransaction<'t> {
    coll: Arc<Collection>,
    txn: &'t RwTxn,
}

impl<'t> CollectionTransaction<'t> {
    /// Pairs a collection with a transaction.
    pub fn new(coll: &Arc<Collection>, txn: &'t Transaction) -> Result<Self> {
        if !Arc::ptr_eq(&coll.db()?, txn.db()) {
            return Err(foreign_collection());
        }
        Ok(Self {
            coll: coll.clone(),
            txn: txn.engine()?,
        })
    }

    /// Rebuilds a scoped view from the raw engine handle given to a change
    /// hook.
    ///
    /// Fails with [`Error::UseAfterFinish`] if the handle's owning
    /// transaction has already finished (its user-slot tag is cleared on
    /// commit/abort).
    pub fn recover(coll: Arc<Collection>, txn: &'t RwTxn) -> Result<Self> {
        let tagged = txn
            .with_user_context(|ctx| ctx.and_then(|any| any.downcast_ref::<TxnTag>()).is_some());
        if !tagged {
            return Err(Error::UseAfterFinish);
        }
        Ok(Self { coll, txn })
    }

    /// The underlying collection.
    #[must_use]
    pub fn collection(&self) -> &Arc<Collection> {
        &self.coll
    }

    pub(crate) fn engine(&self) -> &'t RwTxn {
        self.txn
    }

    pub(crate) fn dbi(&self) -> Dbi {
        self.coll.dbi()
    }

    pub(crate) fn read(&self) -> ReadHandle<'t> {
        ReadHandle::Transaction(self.txn)
    }

    /// Total number of values, seeing this transaction's writes.
    pub fn entry_count(&self) -> Result<u64> {
        Ok(self.txn.entry_count(self.dbi())?)
    }

    /// The collection's sequence counter, seeing this transaction's
    /// advances.
    pub fn last_sequence(&self) -> Result<u64> {
        Ok(self.txn.sequence(self.dbi())?)
    }

    /// Atomically advances the sequence counter by `count` and returns the
    /// first value of the reserved range.
    ///
    /// The advance becomes visible to other views only after commit.
    pub fn next_sequence(&self, count: u64) -> Result<u64> {
        if count == 0 {
            return Err(Error::Engine(EngineError::invalid_argument(
                "sequence count must be at least 1",
            )));
        }
        let current = self.txn.sequence_add(self.dbi(), count)?;
        Ok(current + 1)
    }

    /// Per-collection statistics, seeing this transaction's writes.
    pub fn stat(&self) -> Result<TreeStat> {
        Ok(self.txn.tree_stat(self.dbi())?)
    }

    /// Removes every entry, keeping the collection itself.
    ///
    /// Bulk clears do not fire change hooks.
    pub fn del_all(&self) -> Result<()> {
        self.coll.stats().record_delete();
        self.txn.drop_tree(self.dbi(), false)?;
        Ok(())
    }

    /// Drops the collection from the database.
    ///
    /// The shared [`Collection`] instance becomes unusable; later
    /// operations on it fail with [`Error::NotFound`].
    pub fn delete_collection(self) -> Result<()> {
        self.txn.drop_tree(self.dbi(), true)?;
        if let Ok(db) = self.coll.db() {
            db.collections.write().remove(self.coll.name());
        }
        Ok(())
    }
}

impl std::fmt::Debug for CollectionTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionTransaction")
            .field("collection", &self.coll.name())
            .finish()
    }
}

impl Collection {
    /// The shared instance of this collection in its database's registry.
    fn shared_instance(&self) -> Result<(Database, Arc<Collection>)> {
        let shared = self.db()?;
        let me = shared
            .collections
            .read()
            .get(self.name())
            .cloned()
            .ok_or(Error::NotFound)?;
        Ok((Database { shared }, me))
    }

    /// Runs `f` against a fresh snapshot of this collection, finishing the
    /// snapshot on exit.
    pub fn in_snapshot<T>(
        &self,
        f: impl FnOnce(&CollectionSnapshot<'_>) -> Result<T>,
    ) -> Result<T> {
        let (db, me) = self.shared_instance()?;
        let snap = db.begin_snapshot()?;
        let view = CollectionSnapshot::new(&me, &snap)?;
        let out = f(&view);
        drop(view);
        snap.finish();
        out
    }

    /// Runs `f` with a fresh transaction and this collection.
    ///
    /// The transaction is *not* implicitly committed: `f` owns it and must
    /// call [`Transaction::commit`]; dropping it aborts.
    pub fn in_transaction<T>(
        &self,
        f: impl FnOnce(Transaction, &Arc<Collection>) -> Result<T>,
    ) -> Result<T> {
        let (db, me) = self.shared_instance()?;
        let txn = db.begin_transaction()?;
        f(txn, &me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseOptions;
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::open(&dir.path().join("db"), DatabaseOptions::default()).unwrap()
    }

    #[test]
    fn sequences_advance_and_commit() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stuff = db.collection("stuff").unwrap();

        let txn = db.begin_transaction().unwrap();
        let view = CollectionTransaction::new(&stuff, &txn).unwrap();
        assert_eq!(view.last_sequence().unwrap(), 0);
        assert_eq!(view.next_sequence(1).unwrap(), 1);
        assert_eq!(view.next_sequence(4).unwrap(), 2);
        assert_eq!(view.last_sequence().unwrap(), 5);
        drop(view);
        txn.commit().unwrap();

        let snap = db.begin_snapshot().unwrap();
        let view = CollectionSnapshot::new(&stuff, &snap).unwrap();
        assert_eq!(view.last_sequence().unwrap(), 5);
    }

    #[test]
    fn sequence_invisible_to_concurrent_snapshot() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stuff = db.collection("stuff").unwrap();

        let snap = db.begin_snapshot().unwrap();
        let before = CollectionSnapshot::new(&stuff, &snap).unwrap();

        let txn = db.begin_transaction().unwrap();
        let view = CollectionTransaction::new(&stuff, &txn).unwrap();
        view.next_sequence(3).unwrap();
        drop(view);
        txn.commit().unwrap();

        assert_eq!(before.last_sequence().unwrap(), 0);
    }

    #[test]
    fn zero_count_sequence_is_rejected() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stuff = db.collection("stuff").unwrap();

        let txn = db.begin_transaction().unwrap();
        let view = CollectionTransaction::new(&stuff, &txn).unwrap();
        assert!(view.next_sequence(0).is_err());
    }

    #[test]
    fn recover_requires_live_tag() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stuff = db.collection("stuff").unwrap();

        let txn = db.begin_transaction().unwrap();
        let recovered =
            CollectionTransaction::recover(stuff.clone(), txn.engine().unwrap());
        assert!(recovered.is_ok());
    }

    #[test]
    fn delete_collection_unregisters() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stuff = db.collection("stuff").unwrap();

        let txn = db.begin_transaction().unwrap();
        let view = CollectionTransaction::new(&stuff, &txn).unwrap();
        view.delete_collection().unwrap();
        txn.commit().unwrap();

        assert!(db.get_collection("stuff").unwrap().is_none());
    }

    #[test]
    fn in_snapshot_helper() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stuff = db.collection("stuff").unwrap();

        let count = stuff.in_snapshot(|view| view.entry_count()).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn in_transaction_helper_does_not_commit_by_itself() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let stuff = db.collection("stuff").unwrap();

        stuff
            .in_transaction(|txn, coll| {
                let view = CollectionTransaction::new(coll, &txn)?;
                view.next_sequence(7)?;
                Ok(())
                // txn dropped here: aborted.
            })
            .unwrap();

        let seq = stuff.in_snapshot(|view| view.last_sequence()).unwrap();
        assert_eq!(seq, 0);
    }
}
