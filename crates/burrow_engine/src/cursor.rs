//! Engine cursors.
//!
//! A cursor iterates one tree as of the transaction that opened it. The
//! backing tree is an immutable snapshot, so positions never dangle; the
//! cursor tracks the current key plus an index into that key's duplicate
//! values.

use crate::sort::compare_bytes;
use crate::tree::{Slot, Tree, TreeKey, TreeOptions};
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

/// A key/value pair as returned by cursor positioning operations.
pub type Pair = (Arc<[u8]>, Arc<[u8]>);

#[derive(Debug, Clone)]
struct Pos {
    key: TreeKey,
    dup: usize,
}

/// Stateful iterator over one tree.
pub struct Cursor {
    tree: Arc<Tree>,
    pos: Option<Pos>,
}

impl Cursor {
    pub(crate) fn new(tree: Arc<Tree>) -> Self {
        Self { tree, pos: None }
    }

    /// The tree's configured options.
    #[must_use]
    pub fn options(&self) -> TreeOptions {
        self.tree.options()
    }

    /// Compares two keys under the tree's key order.
    #[must_use]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        compare_bytes(self.tree.options().key_order, a, b)
    }

    /// Whether the cursor is positioned on an entry.
    #[must_use]
    pub fn is_positioned(&self) -> bool {
        self.pos.is_some()
    }

    /// Clears the position.
    pub fn clear(&mut self) {
        self.pos = None;
    }

    fn slot(&self, key: &TreeKey) -> Option<&Slot> {
        self.tree.entries().get(key)
    }

    fn pair_at(&self, pos: &Pos) -> Option<Pair> {
        let slot = self.slot(&pos.key)?;
        let value = slot.value_at(pos.dup)?;
        Some((pos.key.bytes.clone(), value.clone()))
    }

    fn set(&mut self, key: TreeKey, dup: usize) -> Option<Pair> {
        let pos = Pos { key, dup };
        let pair = self.pair_at(&pos);
        if pair.is_some() {
            self.pos = Some(pos);
        }
        pair
    }

    /// The entry under the cursor, if positioned.
    #[must_use]
    pub fn current(&self) -> Option<Pair> {
        self.pos.as_ref().and_then(|pos| self.pair_at(pos))
    }

    /// Number of duplicate values at the current key (0 if unpositioned).
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.pos
            .as_ref()
            .and_then(|pos| self.slot(&pos.key))
            .map_or(0, Slot::len)
    }

    /// Moves to the first entry.
    pub fn first(&mut self) -> Option<Pair> {
        let key = self.tree.entries().keys().next()?.clone();
        self.set(key, 0)
    }

    /// Moves to the last entry (last duplicate of the last key).
    pub fn last(&mut self) -> Option<Pair> {
        let (key, slot) = self.tree.entries().iter().next_back()?;
        let key = key.clone();
        let dup = slot.len().saturating_sub(1);
        self.set(key, dup)
    }

    /// Steps to the next entry; from an unpositioned cursor this is `first`.
    pub fn next(&mut self) -> Option<Pair> {
        let Some(pos) = self.pos.clone() else {
            return self.first();
        };
        if let Some(slot) = self.slot(&pos.key) {
            if pos.dup + 1 < slot.len() {
                return self.set(pos.key, pos.dup + 1);
            }
        }
        self.next_nodup_from(&pos.key)
    }

    /// Steps to the previous entry; from an unpositioned cursor this is
    /// `last`.
    pub fn prev(&mut self) -> Option<Pair> {
        let Some(pos) = self.pos.clone() else {
            return self.last();
        };
        if pos.dup > 0 {
            return self.set(pos.key, pos.dup - 1);
        }
        self.prev_nodup_from(&pos.key)
    }

    /// Moves to the first value of the next key, skipping duplicates.
    pub fn next_nodup(&mut self) -> Option<Pair> {
        let Some(pos) = self.pos.clone() else {
            return self.first();
        };
        self.next_nodup_from(&pos.key)
    }

    /// Moves to the last value of the previous key, skipping duplicates.
    pub fn prev_nodup(&mut self) -> Option<Pair> {
        let Some(pos) = self.pos.clone() else {
            return self.last();
        };
        self.prev_nodup_from(&pos.key)
    }

    fn next_nodup_from(&mut self, key: &TreeKey) -> Option<Pair> {
        let next = self
            .tree
            .entries()
            .range((Bound::Excluded(key.clone()), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())?;
        self.set(next, 0)
    }

    fn prev_nodup_from(&mut self, key: &TreeKey) -> Option<Pair> {
        let (prev, slot) = self
            .tree
            .entries()
            .range((Bound::Unbounded, Bound::Excluded(key.clone())))
            .next_back()?;
        let prev = prev.clone();
        let dup = slot.len().saturating_sub(1);
        self.set(prev, dup)
    }

    /// Moves to the next duplicate value of the current key.
    ///
    /// Returns `None` (leaving the position unchanged) when the current key
    /// has no further values.
    pub fn next_dup(&mut self) -> Option<Pair> {
        let pos = self.pos.clone()?;
        let slot = self.slot(&pos.key)?;
        if pos.dup + 1 < slot.len() {
            self.set(pos.key, pos.dup + 1)
        } else {
            None
        }
    }

    /// Moves to the previous duplicate value of the current key.
    pub fn prev_dup(&mut self) -> Option<Pair> {
        let pos = self.pos.clone()?;
        if pos.dup > 0 {
            self.set(pos.key, pos.dup - 1)
        } else {
            None
        }
    }

    /// Moves to the last duplicate value of the current key.
    pub fn last_dup(&mut self) -> Option<Pair> {
        let pos = self.pos.clone()?;
        let slot = self.slot(&pos.key)?;
        let dup = slot.len().saturating_sub(1);
        self.set(pos.key, dup)
    }

    /// Moves to the smallest key `>= key` (first duplicate).
    pub fn seek_ge(&mut self, key: &[u8]) -> Option<Pair> {
        let probe = self.tree.probe(key);
        let found = self
            .tree
            .entries()
            .range(probe..)
            .next()
            .map(|(k, _)| k.clone())?;
        self.set(found, 0)
    }

    /// Moves to the exact key, or returns `None` leaving the cursor
    /// unpositioned from its previous location.
    pub fn seek_exact(&mut self, key: &[u8]) -> Option<Pair> {
        let probe = self.tree.probe(key);
        if self.slot(&probe).is_some() {
            self.set(probe, 0)
        } else {
            None
        }
    }

    /// Whether the cursor sits on the first entry of the tree.
    #[must_use]
    pub fn on_first(&self) -> bool {
        let Some(pos) = &self.pos else {
            return false;
        };
        if pos.dup != 0 {
            return false;
        }
        self.tree
            .entries()
            .keys()
            .next()
            .is_some_and(|first| first == &pos.key)
    }

    /// Whether the cursor sits on the last entry of the tree.
    #[must_use]
    pub fn on_last(&self) -> bool {
        let Some(pos) = &self.pos else {
            return false;
        };
        match self.tree.entries().iter().next_back() {
            Some((last, slot)) => last == &pos.key && pos.dup + 1 == slot.len(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("positioned", &self.is_positioned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PutFlags;
    use crate::sort::SortOrder;

    fn sample_tree() -> Arc<Tree> {
        let mut tree = Tree::new(TreeOptions::new(SortOrder::Lexical));
        for key in ["a", "b", "c"] {
            tree.put(key.as_bytes(), key.to_uppercase().as_bytes(), PutFlags::upsert())
                .unwrap();
        }
        Arc::new(tree)
    }

    fn dup_sample() -> Arc<Tree> {
        let mut tree = Tree::new(
            TreeOptions::new(SortOrder::Lexical).with_duplicates(SortOrder::Lexical, false),
        );
        for key in ["a", "b"] {
            for value in ["1", "2", "3"] {
                tree.put(key.as_bytes(), value.as_bytes(), PutFlags::upsert())
                    .unwrap();
            }
        }
        Arc::new(tree)
    }

    #[test]
    fn full_forward_scan() {
        let mut cursor = Cursor::new(sample_tree());
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next() {
            keys.push(key.to_vec());
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn full_reverse_scan() {
        let mut cursor = Cursor::new(sample_tree());
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.prev() {
            keys.push(key.to_vec());
        }
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn seek_and_step() {
        let mut cursor = Cursor::new(sample_tree());
        let (key, _) = cursor.seek_ge(b"aa").unwrap();
        assert_eq!(key.as_ref(), b"b");
        let (key, _) = cursor.prev().unwrap();
        assert_eq!(key.as_ref(), b"a");
        assert!(cursor.on_first());

        assert!(cursor.seek_exact(b"nope").is_none());
        assert!(cursor.seek_exact(b"c").is_some());
        assert!(cursor.on_last());
    }

    #[test]
    fn duplicates_walk_in_order() {
        let mut cursor = Cursor::new(dup_sample());
        let (key, value) = cursor.first().unwrap();
        assert_eq!((key.as_ref(), value.as_ref()), (b"a".as_ref(), b"1".as_ref()));
        assert_eq!(cursor.value_count(), 3);

        let (_, value) = cursor.next_dup().unwrap();
        assert_eq!(value.as_ref(), b"2");
        let (_, value) = cursor.next_dup().unwrap();
        assert_eq!(value.as_ref(), b"3");
        assert!(cursor.next_dup().is_none());

        // next() crosses to the next key's first value.
        let (key, value) = cursor.next().unwrap();
        assert_eq!((key.as_ref(), value.as_ref()), (b"b".as_ref(), b"1".as_ref()));

        // next_nodup from the middle of a's dups skips to b as well.
        let mut cursor = Cursor::new(dup_sample());
        cursor.first().unwrap();
        let (key, _) = cursor.next_nodup().unwrap();
        assert_eq!(key.as_ref(), b"b");

        // prev_nodup lands on the previous key's last value.
        let (key, value) = cursor.prev_nodup().unwrap();
        assert_eq!((key.as_ref(), value.as_ref()), (b"a".as_ref(), b"3".as_ref()));
    }

    #[test]
    fn empty_tree_cursor() {
        let tree = Arc::new(Tree::new(TreeOptions::new(SortOrder::Lexical)));
        let mut cursor = Cursor::new(tree);
        assert!(cursor.first().is_none());
        assert!(cursor.last().is_none());
        assert!(cursor.next().is_none());
        assert!(!cursor.on_first());
        assert!(!cursor.on_last());
        assert_eq!(cursor.value_count(), 0);
    }
}
