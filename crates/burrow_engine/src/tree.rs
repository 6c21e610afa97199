//! Ordered trees.
//!
//! A `Tree` is one named namespace of the environment: an ordered map from
//! byte-string keys to either a single value or a sorted set of duplicate
//! values. Values are reference-counted slices so that snapshots and write
//! transactions can share them without copying.

use crate::error::{EngineError, EngineResult};
use crate::flags::PutFlags;
use crate::sort::{check_integer_width, compare_bytes, SortOrder};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Duplicate-value configuration for a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DupOptions {
    /// Ordering of the values under one key.
    pub order: SortOrder,
    /// All values must have the same size (learned from the first insert).
    pub fixed: bool,
}

/// Configuration of a tree, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Ordering of keys.
    pub key_order: SortOrder,
    /// Duplicate-value configuration; `None` means one opaque value per key.
    pub duplicates: Option<DupOptions>,
}

impl TreeOptions {
    /// Single-valued tree with the given key order.
    #[must_use]
    pub const fn new(key_order: SortOrder) -> Self {
        Self {
            key_order,
            duplicates: None,
        }
    }

    /// Enables sorted duplicate values.
    #[must_use]
    pub const fn with_duplicates(mut self, order: SortOrder, fixed: bool) -> Self {
        self.duplicates = Some(DupOptions { order, fixed });
        self
    }

    /// Whether the tree stores multiple values per key.
    #[must_use]
    pub const fn allows_duplicates(&self) -> bool {
        self.duplicates.is_some()
    }
}

/// A key stored in a tree, tagged with the tree's order so the standard
/// map can compare it without a comparator callback.
#[derive(Debug, Clone)]
pub(crate) struct TreeKey {
    pub(crate) order: SortOrder,
    pub(crate) bytes: Arc<[u8]>,
}

impl PartialEq for TreeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TreeKey {}

impl PartialOrd for TreeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_bytes(self.order, &self.bytes, &other.bytes)
    }
}

/// The value(s) stored at one key.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    /// Single-valued tree entry.
    Single(Arc<[u8]>),
    /// Sorted duplicate values; never empty.
    Dup(Vec<Arc<[u8]>>),
}

impl Slot {
    pub(crate) fn len(&self) -> usize {
        match self {
            Slot::Single(_) => 1,
            Slot::Dup(values) => values.len(),
        }
    }

    pub(crate) fn first(&self) -> Option<&Arc<[u8]>> {
        match self {
            Slot::Single(value) => Some(value),
            Slot::Dup(values) => values.first(),
        }
    }

    pub(crate) fn value_at(&self, index: usize) -> Option<&Arc<[u8]>> {
        match self {
            Slot::Single(value) if index == 0 => Some(value),
            Slot::Single(_) => None,
            Slot::Dup(values) => values.get(index),
        }
    }

    pub(crate) fn into_values(self) -> Vec<Arc<[u8]>> {
        match self {
            Slot::Single(value) => vec![value],
            Slot::Dup(values) => values,
        }
    }
}

/// Statistics for one tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeStat {
    /// Total number of values (duplicates counted).
    pub entries: u64,
    /// Number of distinct keys.
    pub keys: u64,
    /// Approximate bytes held by keys and values.
    pub bytes: u64,
    /// Learned value width for fixed-size duplicate trees.
    pub fixed_size: Option<usize>,
}

/// Result of a conditioned `put`.
#[derive(Debug)]
pub struct PutOutcome {
    /// The value displaced by the write (single-valued trees only).
    pub old: Option<Arc<[u8]>>,
    /// The value actually stored; `None` when the write was a no-op
    /// (the exact duplicate pair already existed).
    pub stored: Option<Arc<[u8]>>,
}

/// One ordered namespace of key/value entries.
#[derive(Debug, Clone)]
pub struct Tree {
    options: TreeOptions,
    /// Learned value width for fixed-size duplicate trees.
    fixed_size: Option<usize>,
    entries: BTreeMap<TreeKey, Slot>,
    value_count: u64,
    bytes_used: u64,
}

impl Tree {
    pub(crate) fn new(options: TreeOptions) -> Self {
        Self {
            options,
            fixed_size: None,
            entries: BTreeMap::new(),
            value_count: 0,
            bytes_used: 0,
        }
    }

    pub(crate) fn options(&self) -> TreeOptions {
        self.options
    }

    /// Total number of values, counting each duplicate.
    pub(crate) fn value_count(&self) -> u64 {
        self.value_count
    }

    pub(crate) fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub(crate) fn fixed_size(&self) -> Option<usize> {
        self.fixed_size
    }

    /// Restores a learned fixed width during recovery.
    pub(crate) fn set_fixed_size(&mut self, size: Option<usize>) {
        self.fixed_size = size;
    }

    pub(crate) fn entries(&self) -> &BTreeMap<TreeKey, Slot> {
        &self.entries
    }

    pub(crate) fn probe(&self, key: &[u8]) -> TreeKey {
        TreeKey {
            order: self.options.key_order,
            bytes: Arc::from(key),
        }
    }

    fn check_key(&self, key: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::invalid_argument("empty key"));
        }
        if self.options.key_order == SortOrder::Integer {
            check_integer_width(key)?;
        }
        Ok(())
    }

    fn check_value(&mut self, value: &[u8]) -> EngineResult<()> {
        let Some(dup) = self.options.duplicates else {
            return Ok(());
        };
        if dup.order == SortOrder::Integer {
            check_integer_width(value)?;
        }
        if dup.fixed {
            match self.fixed_size {
                None => self.fixed_size = Some(value.len()),
                Some(size) if size != value.len() => {
                    return Err(EngineError::bad_value_size(size, value.len()));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Returns the first value stored at `key`.
    pub(crate) fn get(&self, key: &[u8]) -> EngineResult<Option<Arc<[u8]>>> {
        self.check_key(key)?;
        let probe = self.probe(key);
        Ok(self
            .entries
            .get(&probe)
            .and_then(Slot::first)
            .cloned())
    }

    /// Returns the smallest entry with a key `>= key`.
    pub(crate) fn get_ge(&self, key: &[u8]) -> EngineResult<Option<(Arc<[u8]>, Arc<[u8]>)>> {
        self.check_key(key)?;
        let probe = self.probe(key);
        Ok(self
            .entries
            .range(probe..)
            .next()
            .and_then(|(k, slot)| slot.first().map(|v| (k.bytes.clone(), v.clone()))))
    }

    pub(crate) fn contains_pair(&self, key: &[u8], value: &[u8]) -> bool {
        let probe = self.probe(key);
        match self.entries.get(&probe) {
            None => false,
            Some(Slot::Single(stored)) => stored.as_ref() == value,
            Some(Slot::Dup(values)) => {
                let order = self
                    .options
                    .duplicates
                    .map_or(SortOrder::Lexical, |d| d.order);
                values
                    .binary_search_by(|v| compare_bytes(order, v, value))
                    .is_ok()
            }
        }
    }

    /// Conditioned insert/update.
    pub(crate) fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: PutFlags,
    ) -> EngineResult<PutOutcome> {
        self.check_key(key)?;
        self.check_value(value)?;
        let probe = self.probe(key);

        if flags.append {
            if let Some((last, _)) = self.entries.iter().next_back() {
                if compare_bytes(self.options.key_order, key, &last.bytes) != Ordering::Greater {
                    return Err(EngineError::KeyMismatch);
                }
            }
        }
        if flags.no_overwrite && self.entries.contains_key(&probe) {
            return Err(EngineError::KeyExist);
        }
        if flags.current {
            match self.entries.get(&probe) {
                None => return Err(EngineError::NotFound),
                Some(slot) if slot.len() > 1 => return Err(EngineError::MultipleValues),
                Some(_) => {}
            }
        }

        let stored: Arc<[u8]> = Arc::from(value);
        match self.options.duplicates {
            None => {
                if let Some(slot) = self.entries.get_mut(&probe) {
                    let old = slot.first().cloned();
                    let old_len = old.as_ref().map_or(0, |v| v.len() as u64);
                    *slot = Slot::Single(stored.clone());
                    self.bytes_used = self.bytes_used - old_len + stored.len() as u64;
                    Ok(PutOutcome {
                        old,
                        stored: Some(stored),
                    })
                } else {
                    self.bytes_used += (key.len() + stored.len()) as u64;
                    self.value_count += 1;
                    self.entries.insert(probe, Slot::Single(stored.clone()));
                    Ok(PutOutcome {
                        old: None,
                        stored: Some(stored),
                    })
                }
            }
            Some(dup) => {
                if flags.current {
                    // Validated above: the key exists with exactly one value.
                    let Some(Slot::Dup(values)) = self.entries.get_mut(&probe) else {
                        return Err(EngineError::corrupted(
                            "duplicate-keyed tree holds a single-value slot",
                        ));
                    };
                    let old = values.first().cloned();
                    let old_len = old.as_ref().map_or(0, |v| v.len() as u64);
                    *values = vec![stored.clone()];
                    self.bytes_used = self.bytes_used - old_len + stored.len() as u64;
                    return Ok(PutOutcome {
                        old,
                        stored: Some(stored),
                    });
                }
                if flags.all_dups {
                    let removed = self.del_key(key)?;
                    let removed_first = removed.into_iter().next();
                    self.bytes_used += (key.len() + stored.len()) as u64;
                    self.value_count += 1;
                    self.entries
                        .insert(self.probe(key), Slot::Dup(vec![stored.clone()]));
                    return Ok(PutOutcome {
                        old: removed_first,
                        stored: Some(stored),
                    });
                }

                // Pre-existing pair checks against the current dup set.
                if let Some(Slot::Dup(values)) = self.entries.get(&probe) {
                    match values.binary_search_by(|v| compare_bytes(dup.order, v, value)) {
                        Ok(_) => {
                            if flags.no_dup_data {
                                return Err(EngineError::KeyExist);
                            }
                            return Ok(PutOutcome {
                                old: None,
                                stored: None,
                            });
                        }
                        Err(pos) => {
                            if flags.append_dup && pos != values.len() {
                                return Err(EngineError::KeyMismatch);
                            }
                        }
                    }
                }

                if !self.entries.contains_key(&probe) {
                    self.bytes_used += key.len() as u64;
                    self.entries.insert(probe.clone(), Slot::Dup(Vec::new()));
                }
                let Some(Slot::Dup(values)) = self.entries.get_mut(&probe) else {
                    return Err(EngineError::corrupted(
                        "duplicate-keyed tree holds a single-value slot",
                    ));
                };
                let pos = match values.binary_search_by(|v| compare_bytes(dup.order, v, value)) {
                    Err(pos) => pos,
                    Ok(_) => {
                        return Ok(PutOutcome {
                            old: None,
                            stored: None,
                        })
                    }
                };
                values.insert(pos, stored.clone());
                self.value_count += 1;
                self.bytes_used += stored.len() as u64;
                Ok(PutOutcome {
                    old: None,
                    stored: Some(stored),
                })
            }
        }
    }

    /// Atomically swaps the value at `key`, returning the prior value.
    ///
    /// `None` deletes the key. Only valid on single-valued trees.
    pub(crate) fn replace(
        &mut self,
        key: &[u8],
        new: Option<&[u8]>,
    ) -> EngineResult<Option<Arc<[u8]>>> {
        if self.options.allows_duplicates() {
            return Err(EngineError::invalid_argument(
                "replace on a duplicate-keyed tree",
            ));
        }
        match new {
            Some(value) => {
                let outcome = self.put(key, value, PutFlags::upsert())?;
                Ok(outcome.old)
            }
            None => {
                let removed = self.del_key(key)?;
                Ok(removed.into_iter().next())
            }
        }
    }

    /// Deletes `key` and all values stored under it.
    ///
    /// Returns the removed values (empty when the key was absent).
    pub(crate) fn del_key(&mut self, key: &[u8]) -> EngineResult<Vec<Arc<[u8]>>> {
        self.check_key(key)?;
        let probe = self.probe(key);
        match self.entries.remove(&probe) {
            None => Ok(Vec::new()),
            Some(slot) => {
                let values = slot.into_values();
                self.value_count -= values.len() as u64;
                let value_bytes: u64 = values.iter().map(|v| v.len() as u64).sum();
                self.bytes_used -= key.len() as u64 + value_bytes;
                Ok(values)
            }
        }
    }

    /// Deletes the exact `(key, value)` pair. Returns whether it existed.
    pub(crate) fn del_pair(&mut self, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        self.check_key(key)?;
        let probe = self.probe(key);
        let dup_order = self.options.duplicates.map(|d| d.order);
        match self.entries.get_mut(&probe) {
            None => Ok(false),
            Some(Slot::Single(stored)) => {
                if stored.as_ref() != value {
                    return Ok(false);
                }
                let removed_len = stored.len() as u64;
                self.entries.remove(&probe);
                self.value_count -= 1;
                self.bytes_used -= key.len() as u64 + removed_len;
                Ok(true)
            }
            Some(Slot::Dup(values)) => {
                let order = dup_order.unwrap_or(SortOrder::Lexical);
                let pos = match values.binary_search_by(|v| compare_bytes(order, v, value)) {
                    Err(_) => return Ok(false),
                    Ok(pos) => pos,
                };
                let removed = values.remove(pos);
                let now_empty = values.is_empty();
                self.value_count -= 1;
                self.bytes_used -= removed.len() as u64;
                if now_empty {
                    self.entries.remove(&probe);
                    self.bytes_used -= key.len() as u64;
                }
                Ok(true)
            }
        }
    }

    pub(crate) fn stat(&self) -> TreeStat {
        TreeStat {
            entries: self.value_count,
            keys: self.entries.len() as u64,
            bytes: self.bytes_used,
            fixed_size: self.fixed_size,
        }
    }

    /// Removes every entry, keeping the tree's configuration.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.value_count = 0;
        self.bytes_used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_tree() -> Tree {
        Tree::new(TreeOptions::new(SortOrder::Lexical))
    }

    fn dup_tree() -> Tree {
        Tree::new(TreeOptions::new(SortOrder::Lexical).with_duplicates(SortOrder::Lexical, false))
    }

    #[test]
    fn put_get_round_trip() {
        let mut tree = lex_tree();
        tree.put(b"foo", b"bar", PutFlags::upsert()).unwrap();
        assert_eq!(tree.get(b"foo").unwrap().unwrap().as_ref(), b"bar");
        assert!(tree.get(b"missing").unwrap().is_none());
    }

    #[test]
    fn upsert_replaces_and_reports_old() {
        let mut tree = lex_tree();
        tree.put(b"k", b"one", PutFlags::upsert()).unwrap();
        let outcome = tree.put(b"k", b"two", PutFlags::upsert()).unwrap();
        assert_eq!(outcome.old.unwrap().as_ref(), b"one");
        assert_eq!(tree.value_count(), 1);
    }

    #[test]
    fn no_overwrite_refuses_existing() {
        let mut tree = lex_tree();
        tree.put(b"k", b"v", PutFlags::upsert()).unwrap();
        let err = tree
            .put(b"k", b"w", PutFlags::upsert().no_overwrite(true))
            .unwrap_err();
        assert!(matches!(err, EngineError::KeyExist));
    }

    #[test]
    fn current_requires_existing() {
        let mut tree = lex_tree();
        let err = tree
            .put(b"k", b"v", PutFlags::upsert().current(true))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound));
    }

    #[test]
    fn append_enforces_order() {
        let mut tree = lex_tree();
        tree.put(b"a", b"1", PutFlags::upsert().append(true)).unwrap();
        tree.put(b"b", b"2", PutFlags::upsert().append(true)).unwrap();
        let err = tree
            .put(b"b", b"3", PutFlags::upsert().append(true))
            .unwrap_err();
        assert!(matches!(err, EngineError::KeyMismatch));
    }

    #[test]
    fn duplicates_sorted_and_deduplicated() {
        let mut tree = dup_tree();
        tree.put(b"k", b"bb", PutFlags::upsert()).unwrap();
        tree.put(b"k", b"aa", PutFlags::upsert()).unwrap();
        tree.put(b"k", b"cc", PutFlags::upsert()).unwrap();
        assert_eq!(tree.value_count(), 3);

        // Exact pair again: silent no-op without the flag, KeyExist with it.
        let outcome = tree.put(b"k", b"aa", PutFlags::upsert()).unwrap();
        assert!(outcome.stored.is_none());
        let err = tree
            .put(b"k", b"aa", PutFlags::upsert().no_dup_data(true))
            .unwrap_err();
        assert!(matches!(err, EngineError::KeyExist));

        let probe = tree.probe(b"k");
        let Slot::Dup(values) = &tree.entries()[&probe] else {
            panic!("expected dup slot");
        };
        let ordered: Vec<&[u8]> = values.iter().map(|v| v.as_ref()).collect();
        assert_eq!(ordered, vec![b"aa".as_ref(), b"bb".as_ref(), b"cc".as_ref()]);
    }

    #[test]
    fn del_pair_removes_single_duplicate() {
        let mut tree = dup_tree();
        tree.put(b"k", b"aa", PutFlags::upsert()).unwrap();
        tree.put(b"k", b"bb", PutFlags::upsert()).unwrap();

        assert!(tree.del_pair(b"k", b"aa").unwrap());
        assert!(!tree.del_pair(b"k", b"aa").unwrap());
        assert_eq!(tree.value_count(), 1);

        assert!(tree.del_pair(b"k", b"bb").unwrap());
        assert_eq!(tree.key_count(), 0);
        assert_eq!(tree.bytes_used(), 0);
    }

    #[test]
    fn del_key_returns_removed_values() {
        let mut tree = dup_tree();
        tree.put(b"k", b"aa", PutFlags::upsert()).unwrap();
        tree.put(b"k", b"bb", PutFlags::upsert()).unwrap();
        let removed = tree.del_key(b"k").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(tree.del_key(b"k").unwrap().is_empty());
    }

    #[test]
    fn integer_keys_ordered_by_value() {
        let mut tree = Tree::new(TreeOptions::new(SortOrder::Integer));
        tree.put(&100u32.to_ne_bytes(), b"hundred", PutFlags::upsert())
            .unwrap();
        tree.put(&9u32.to_ne_bytes(), b"nine", PutFlags::upsert())
            .unwrap();
        let (key, value) = tree.get_ge(&1u32.to_ne_bytes()).unwrap().unwrap();
        assert_eq!(key.as_ref(), 9u32.to_ne_bytes());
        assert_eq!(value.as_ref(), b"nine");

        let err = tree.put(b"abc", b"x", PutFlags::upsert()).unwrap_err();
        assert!(matches!(err, EngineError::BadValueSize { .. }));
    }

    #[test]
    fn fixed_size_learned_from_first_insert() {
        let mut tree = Tree::new(
            TreeOptions::new(SortOrder::Lexical).with_duplicates(SortOrder::Lexical, true),
        );
        tree.put(b"k", b"abcd", PutFlags::upsert()).unwrap();
        assert_eq!(tree.fixed_size(), Some(4));
        let err = tree.put(b"k", b"ab", PutFlags::upsert()).unwrap_err();
        assert!(matches!(err, EngineError::BadValueSize { .. }));
    }

    #[test]
    fn replace_swaps_and_deletes() {
        let mut tree = lex_tree();
        assert!(tree.replace(b"k", Some(b"one".as_ref())).unwrap().is_none());
        assert_eq!(
            tree.replace(b"k", Some(b"two".as_ref())).unwrap().unwrap().as_ref(),
            b"one"
        );
        assert_eq!(tree.replace(b"k", None).unwrap().unwrap().as_ref(), b"two");
        assert!(tree.get(b"k").unwrap().is_none());
    }
}
