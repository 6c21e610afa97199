//! Secondary indexes.
//!
//! An [`Index`] is a derived collection maintained through the source
//! collection's change-hook chain. Its keys are [`Collatable`] emissions
//! from an indexer function applied to source values; its values are the
//! emitted extra (if any) concatenated with the collatable-encoded source
//! key, so composite values sort and decode deterministically.
//!
//! The indexer must be *repeatable*: the same source value must always
//! produce the same emissions. A non-repeatable indexer silently corrupts
//! the index; this is not a recoverable condition.

use crate::collatable::Collatable;
use crate::collection::{Change, Collection, CollectionOptions, HookOutcome, KeySort, ValueSort};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::scoped::{CollectionSnapshot, CollectionTransaction};
use crate::txn::Snapshot;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// Collects the emissions of one indexer invocation.
pub struct Emitter {
    rows: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Emitter {
    fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Emits an index key.
    pub fn emit(&mut self, key: &Collatable) {
        self.rows.push((key.bytes().to_vec(), Vec::new()));
    }

    /// Emits an index key with extra payload stored ahead of the encoded
    /// source key in the index value.
    pub fn emit_with(&mut self, key: &Collatable, extra: &Collatable) {
        self.rows
            .push((key.bytes().to_vec(), extra.bytes().to_vec()));
    }
}

/// An indexer: maps a source value to zero or more emissions.
///
/// Must be repeatable (pure with respect to its input).
pub type IndexerFn = Arc<dyn Fn(&[u8], &mut Emitter) + Send + Sync>;

struct IndexInner {
    /// Cleared when the index is deleted; the change hook observes this
    /// and unregisters itself.
    indexer: RwLock<Option<IndexerFn>>,
    update_count: AtomicU64,
}

/// A secondary index over a source collection.
pub struct Index {
    name: String,
    source: Arc<Collection>,
    backing: Arc<Collection>,
    inner: Arc<IndexInner>,
}

impl Database {
    /// Opens (or creates) an index named `name` over `source`.
    ///
    /// The backing collection is named `"index::<source>::<name>"` and
    /// allows duplicate keys (lexical values). A freshly created index is
    /// rebuilt from the source before this returns.
    pub fn open_index(
        &self,
        source: &Arc<Collection>,
        name: &str,
        indexer: IndexerFn,
    ) -> Result<Index> {
        let backing_name = format!("index::{}::{}", source.name(), name);
        let backing = self.open_collection(
            &backing_name,
            CollectionOptions::new()
                .create(true)
                .key_sort(KeySort::Lexical)
                .value_sort(ValueSort::Lexical),
        )?;
        let inner = Arc::new(IndexInner {
            indexer: RwLock::new(Some(indexer)),
            update_count: AtomicU64::new(0),
        });
        let index = Index {
            name: name.to_string(),
            source: source.clone(),
            backing: backing.clone(),
            inner: inner.clone(),
        };
        if !backing.is_initialized() {
            index.rebuild(self)?;
        }

        let weak = Arc::downgrade(&inner);
        let hook_backing = backing;
        let source_sort = source.key_sort();
        source.add_change_hook(Arc::new(move |change| {
            run_index_hook(&weak, &hook_backing, source_sort, change)
        }));
        Ok(index)
    }

    /// Deletes an index: clears its indexer (which breaks the change hook
    /// on the next source mutation) and drops its backing collection.
    pub fn delete_index(&self, index: Index) -> Result<()> {
        *index.inner.indexer.write() = None;
        let txn = self.begin_transaction()?;
        let view = CollectionTransaction::new(&index.backing, &txn)?;
        view.delete_collection()?;
        txn.commit()?;
        Ok(())
    }
}

impl Index {
    /// The index's short name (without the `index::` prefix).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source collection.
    #[must_use]
    pub fn source(&self) -> &Arc<Collection> {
        &self.source
    }

    /// The backing collection storing the index entries.
    #[must_use]
    pub fn collection(&self) -> &Arc<Collection> {
        &self.backing
    }

    /// Number of times a change hook modified this index.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.inner.update_count.load(Ordering::SeqCst)
    }

    /// Exposes the index as a regular collection snapshot: keys are the
    /// emitted collatables, values the composite
    /// `extra ++ encoded_source_key`.
    pub fn with<'s>(&self, snap: &'s Snapshot) -> Result<CollectionSnapshot<'s>> {
        CollectionSnapshot::new(&self.backing, snap)
    }

    /// Number of entries in the index.
    pub fn entry_count(&self) -> Result<u64> {
        self.backing.in_snapshot(|view| view.entry_count())
    }

    /// Clears and repopulates the index from the entire source collection.
    pub fn rebuild(&self, db: &Database) -> Result<()> {
        let indexer = self
            .inner
            .indexer
            .read()
            .clone()
            .ok_or(Error::NotFound)?;
        let source_sort = self.source.key_sort();

        let txn = db.begin_transaction()?;
        let view = CollectionTransaction::new(&self.backing, &txn)?;
        view.del_all()?;

        let mut cursor = txn.engine()?.cursor(self.source.dbi())?;
        while let Some((key, value)) = cursor.next() {
            let encoded_key = encode_source_key(source_sort, &key)?;
            let mut emitter = Emitter::new();
            indexer(&value, &mut emitter);
            for (index_key, mut composite) in emitter.rows {
                composite.extend_from_slice(&encoded_key);
                view.insert(index_key.as_slice(), composite.as_slice())?;
            }
        }
        drop(view);
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("source", &self.source.name())
            .field("update_count", &self.update_count())
            .finish()
    }
}

/// Encodes a source key for storage inside index values.
///
/// Integer-keyed sources encode as a collatable integer, everything else
/// as a collatable string, so composite values sort and decode cleanly.
fn encode_source_key(sort: KeySort, key: &[u8]) -> Result<Vec<u8>> {
    let mut c = Collatable::new();
    match sort {
        KeySort::Integer => {
            let n = match key.len() {
                4 => {
                    let arr: [u8; 4] = key.try_into().map_err(|_| Error::BadValueSize {
                        expected: 4,
                        actual: key.len(),
                    })?;
                    i64::from(u32::from_ne_bytes(arr))
                }
                8 => {
                    let arr: [u8; 8] = key.try_into().map_err(|_| Error::BadValueSize {
                        expected: 8,
                        actual: key.len(),
                    })?;
                    u64::from_ne_bytes(arr) as i64
                }
                n => {
                    return Err(Error::BadValueSize {
                        expected: 8,
                        actual: n,
                    })
                }
            };
            c.add_i64(n);
        }
        _ => {
            c.add_bytes(key);
        }
    }
    Ok(c.into_bytes())
}

fn run_index_hook(
    weak: &Weak<IndexInner>,
    backing: &Arc<Collection>,
    source_sort: KeySort,
    change: &Change<'_>,
) -> HookOutcome {
    let Some(inner) = weak.upgrade() else {
        return HookOutcome::Unregister;
    };
    let Some(indexer) = inner.indexer.read().clone() else {
        return HookOutcome::Unregister;
    };
    if change.old_value == change.new_value {
        return HookOutcome::Keep;
    }
    if let Err(err) = apply_change(&inner, &indexer, backing, source_sort, change) {
        // A failing hook must not poison the transaction: trap, count,
        // and let the parent mutation proceed.
        backing.stats().record_hook_failure();
        error!(index = backing.name(), error = %err, "index update failed");
    }
    HookOutcome::Keep
}

/// Diffs the emissions of the old and new value and applies the
/// difference to the index, inside the mutating transaction.
fn apply_change(
    inner: &IndexInner,
    indexer: &IndexerFn,
    backing: &Arc<Collection>,
    source_sort: KeySort,
    change: &Change<'_>,
) -> Result<()> {
    let encoded_key = encode_source_key(source_sort, change.key)?;
    let old_rows = collect_rows(indexer, change.old_value, &encoded_key);
    let mut new_rows = collect_rows(indexer, change.new_value, &encoded_key);

    let view = CollectionTransaction::recover(backing.clone(), change.txn)?;
    let mut changed = false;
    for (key, value) in old_rows {
        if let Some(pos) = new_rows
            .iter()
            .position(|row| row.0 == key && row.1 == value)
        {
            // Emitted by both sides: untouched.
            new_rows.swap_remove(pos);
        } else {
            view.del_value(key.as_slice(), value.as_slice())?;
            changed = true;
        }
    }
    for (key, value) in new_rows {
        view.insert(key.as_slice(), value.as_slice())?;
        changed = true;
    }
    if changed {
        inner.update_count.fetch_add(1, Ordering::SeqCst);
        backing.stats().record_index_update();
    }
    Ok(())
}

fn collect_rows(
    indexer: &IndexerFn,
    value: Option<&[u8]>,
    encoded_key: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let Some(value) = value else {
        return Vec::new();
    };
    let mut emitter = Emitter::new();
    indexer(value, &mut emitter);
    emitter
        .rows
        .into_iter()
        .map(|(index_key, mut extra)| {
            extra.extend_from_slice(encoded_key);
            (index_key, extra)
        })
        .collect()
}
