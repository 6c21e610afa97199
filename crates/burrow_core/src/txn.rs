//! Snapshots and transactions.
//!
//! A [`Snapshot`] is a read-only, point-in-time view; a [`Transaction`] is
//! the database's single read-write view. Both own their engine handle:
//! `finish`/`commit`/`abort` consume the object, so use-after-finish is a
//! compile error on the owned path. Dropping a live transaction aborts it.

use crate::database::{Database, DatabaseShared};
use crate::error::{Error, Result};
use burrow_engine::{RoTxn, RwTxn};
use std::sync::Arc;

/// Tag stored in the engine's per-transaction user slot, linking a raw
/// handle back to the owning [`Transaction`]. Cleared on commit/abort, so
/// recovery from a stale handle fails `UseAfterFinish`.
pub(crate) struct TxnTag {
    #[allow(dead_code)] // read through Any downcasts during recovery
    pub(crate) id: u64,
}

/// A read-only, point-in-time view of the database.
///
/// While alive it pins the state it was begun against; concurrent commits
/// are invisible to it.
pub struct Snapshot {
    inner: RoTxn,
    db: Arc<DatabaseShared>,
}

/// The database's read-write view. Mutually exclusive with any other
/// transaction; `begin_transaction` blocks until the current writer
/// finishes.
pub struct Transaction {
    inner: Option<RwTxn>,
    db: Arc<DatabaseShared>,
}

impl Database {
    /// Begins a read-only snapshot.
    pub fn begin_snapshot(&self) -> Result<Snapshot> {
        self.shared.check_open()?;
        let inner = self.shared.env.begin_ro()?;
        let id = inner.id();
        inner.set_user_context(Some(Box::new(TxnTag { id })));
        self.shared.stats.record_snapshot();
        Ok(Snapshot {
            inner,
            db: self.shared.clone(),
        })
    }

    /// Begins the read-write transaction, blocking until any concurrent
    /// writer finishes.
    pub fn begin_transaction(&self) -> Result<Transaction> {
        self.shared.check_open()?;
        let inner = self.shared.env.begin_rw()?;
        let id = inner.id();
        inner.set_user_context(Some(Box::new(TxnTag { id })));
        self.shared.stats.record_transaction();
        Ok(Transaction {
            inner: Some(inner),
            db: self.shared.clone(),
        })
    }
}

impl Snapshot {
    pub(crate) fn engine(&self) -> &RoTxn {
        &self.inner
    }

    pub(crate) fn db(&self) -> &Arc<DatabaseShared> {
        &self.db
    }

    /// Ends the snapshot, releasing its view of the database. Dropping has
    /// the same effect.
    pub fn finish(self) {}
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.inner.id())
            .finish()
    }
}

impl Transaction {
    /// The raw engine handle, as passed to change hooks.
    pub fn engine(&self) -> Result<&RwTxn> {
        self.inner.as_ref().ok_or(Error::UseAfterFinish)
    }

    pub(crate) fn db(&self) -> &Arc<DatabaseShared> {
        &self.db
    }

    /// Commits all writes durably.
    pub fn commit(mut self) -> Result<()> {
        let inner = self.inner.take().ok_or(Error::UseAfterFinish)?;
        inner.set_user_context(None);
        match inner.commit() {
            Ok(()) => {
                self.db.stats.record_commit();
                Ok(())
            }
            Err(err) => {
                self.db.stats.record_abort();
                Err(err.into())
            }
        }
    }

    /// Discards all writes. Dropping has the same effect.
    pub fn abort(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.set_user_context(None);
            inner.abort();
            self.db.stats.record_abort();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.set_user_context(None);
            self.db.stats.record_abort();
            // Dropping the engine handle aborts and releases the writer.
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("live", &self.inner.is_some())
            .finish()
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
    fn transaction_counters() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        let txn = db.begin_transaction().unwrap();
        txn.commit().unwrap();

        let txn = db.begin_transaction().unwrap();
        txn.abort();

        {
            let _txn = db.begin_transaction().unwrap();
            // Dropped: counts as an abort.
        }

        let counters = db.stats().unwrap().counters;
        assert_eq!(counters.transactions_started, 3);
        assert_eq!(counters.transactions_committed, 1);
        assert_eq!(counters.transactions_aborted, 2);
    }

    #[test]
    fn snapshot_counter() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let snap = db.begin_snapshot().unwrap();
        snap.finish();
        assert_eq!(db.stats().unwrap().counters.snapshots_started, 1);
    }

    #[test]
    fn user_slot_carries_a_tag_while_live() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        let txn = db.begin_transaction().unwrap();
        let tagged = txn
            .engine()
            .unwrap()
            .with_user_context(|ctx| ctx.and_then(|any| any.downcast_ref::<TxnTag>()).is_some());
        assert!(tagged);
        txn.commit().unwrap();
    }
}
