//! Database operation counters.
//!
//! All counters are atomic and monotonically increasing; they can be read
//! while operations are in progress via [`DatabaseStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Live operation counters for one database.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    snapshots_started: AtomicU64,
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    index_updates: AtomicU64,
    hook_failures: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Read operations (get, get-greater-or-equal, cursor reads).
    pub reads: u64,
    /// Write operations (puts of every flavor).
    pub writes: u64,
    /// Delete operations.
    pub deletes: u64,
    /// Snapshots begun.
    pub snapshots_started: u64,
    /// Write transactions begun.
    pub transactions_started: u64,
    /// Write transactions committed.
    pub transactions_committed: u64,
    /// Write transactions aborted (explicitly or by drop).
    pub transactions_aborted: u64,
    /// Index entries inserted or deleted by change hooks.
    pub index_updates: u64,
    /// Change hooks that failed and were trapped.
    pub hook_failures: u64,
}

impl DatabaseStats {
    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot(&self) {
        self.snapshots_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_index_update(&self) {
        self.index_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hook_failure(&self) {
        self.hook_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            snapshots_started: self.snapshots_started.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            index_updates: self.index_updates.load(Ordering::Relaxed),
            hook_failures: self.hook_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = DatabaseStats::default();
        stats.record_read();
        stats.record_read();
        stats.record_write();
        stats.record_commit();

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.deletes, 0);
    }
}
