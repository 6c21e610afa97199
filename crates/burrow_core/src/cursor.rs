//! Bounded, ordered iteration over a scoped snapshot.
//!
//! A cursor starts *unpositioned*; positioning operations move it onto an
//! entry or, once it walks past its bounds, into a terminal cleared state.
//! Optional inclusive bounds (`min_key`/`max_key`) can be made exclusive
//! with the skip flags. Comparison uses the collection's own key order,
//! not a plain byte compare.

use crate::collection::Collection;
use crate::datum::Datum;
use crate::error::{Error, Result};
use crate::scoped::CollectionSnapshot;
use crate::stats::DatabaseStats;
use crate::value::Value;
use burrow_engine::{Cursor as EngineCursor, EngineError, Pair};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    /// No positioning operation has run yet.
    Initial,
    /// On an entry.
    On,
    /// Walked past the range (or an exhausted collection).
    Done,
}

/// A stateful, optionally bounded cursor over one collection.
pub struct Cursor<'s> {
    inner: EngineCursor,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    skip_min: bool,
    skip_max: bool,
    state: IterState,
    stats: Arc<DatabaseStats>,
    _scope: PhantomData<&'s Collection>,
}

fn missing_key() -> Error {
    Error::Engine(EngineError::invalid_argument("a key is required"))
}

impl<'s> CollectionSnapshot<'s> {
    /// Opens an unbounded cursor.
    pub fn cursor(&self) -> Result<Cursor<'s>> {
        Ok(Cursor {
            inner: self.read().cursor(self.dbi())?,
            min_key: None,
            max_key: None,
            skip_min: false,
            skip_max: false,
            state: IterState::Initial,
            stats: self.collection().stats().clone(),
            _scope: PhantomData,
        })
    }

    /// Opens a cursor pre-bounded by a key range.
    ///
    /// `Bound::Unbounded` leaves that end open; `Bound::Excluded` sets the
    /// corresponding skip flag.
    pub fn range<'k>(
        &self,
        min: Bound<Datum<'k>>,
        max: Bound<Datum<'k>>,
    ) -> Result<Cursor<'s>> {
        let mut cursor = self.cursor()?;
        match min {
            Bound::Unbounded => {}
            Bound::Included(key) => cursor.set_min(key, false)?,
            Bound::Excluded(key) => cursor.set_min(key, true)?,
        }
        match max {
            Bound::Unbounded => {}
            Bound::Included(key) => cursor.set_max(key, false)?,
            Bound::Excluded(key) => cursor.set_max(key, true)?,
        }
        Ok(cursor)
    }

    /// Iterates all `(key, value)` pairs in ascending key order.
    pub fn pairs(&self) -> Result<Pairs<'s>> {
        Ok(Pairs {
            cursor: self.cursor()?,
            started: false,
        })
    }

    /// Iterates all `(key, value)` pairs in descending key order.
    pub fn pairs_reversed(&self) -> Result<PairsReversed<'s>> {
        Ok(PairsReversed {
            cursor: self.cursor()?,
            started: false,
        })
    }
}

impl<'s> Cursor<'s> {
    /// Sets (or clears the skip flag of) the inclusive lower bound.
    pub fn set_min<'k>(&mut self, key: impl Into<Datum<'k>>, skip: bool) -> Result<()> {
        let key = key.into().encode().ok_or_else(missing_key)?;
        self.min_key = Some(key.into_owned());
        self.skip_min = skip;
        Ok(())
    }

    /// Sets (or clears the skip flag of) the inclusive upper bound.
    pub fn set_max<'k>(&mut self, key: impl Into<Datum<'k>>, skip: bool) -> Result<()> {
        let key = key.into().encode().ok_or_else(missing_key)?;
        self.max_key = Some(key.into_owned());
        self.skip_max = skip;
        Ok(())
    }

    /// The lower bound, if set.
    #[must_use]
    pub fn min_key(&self) -> Option<&[u8]> {
        self.min_key.as_deref()
    }

    /// The upper bound, if set.
    #[must_use]
    pub fn max_key(&self) -> Option<&[u8]> {
        self.max_key.as_deref()
    }

    /// Whether the lower bound is exclusive.
    #[must_use]
    pub fn skip_min(&self) -> bool {
        self.skip_min
    }

    /// Whether the upper bound is exclusive.
    #[must_use]
    pub fn skip_max(&self) -> bool {
        self.skip_max
    }

    fn beyond_max(&self, key: &[u8]) -> bool {
        match &self.max_key {
            None => false,
            Some(max) => match self.inner.compare(key, max) {
                Ordering::Greater => true,
                Ordering::Equal => self.skip_max,
                Ordering::Less => false,
            },
        }
    }

    fn before_min(&self, key: &[u8]) -> bool {
        match &self.min_key {
            None => false,
            Some(min) => match self.inner.compare(key, min) {
                Ordering::Less => true,
                Ordering::Equal => self.skip_min,
                Ordering::Greater => false,
            },
        }
    }

    fn settle(&mut self, pair: Option<Pair>) -> bool {
        match pair {
            Some(_) => {
                self.state = IterState::On;
                true
            }
            None => {
                self.inner.clear();
                self.state = IterState::Done;
                false
            }
        }
    }

    /// Moves to the first in-range entry.
    pub fn first(&mut self) -> bool {
        self.stats.record_read();
        let mut pair = match self.min_key.clone() {
            None => self.inner.first(),
            Some(min) => {
                let mut found = self.inner.seek_ge(&min);
                if self.skip_min {
                    if let Some((key, _)) = &found {
                        if self.inner.compare(key, &min) == Ordering::Equal {
                            found = self.inner.next_nodup();
                        }
                    }
                }
                found
            }
        };
        if let Some((key, _)) = &pair {
            if self.beyond_max(key) {
                pair = None;
            }
        }
        self.settle(pair)
    }

    /// Moves to the last in-range entry.
    pub fn last(&mut self) -> bool {
        self.stats.record_read();
        let mut pair = match self.max_key.clone() {
            None => self.inner.last(),
            Some(max) => match self.inner.seek_ge(&max) {
                Some((key, _)) => {
                    if self.inner.compare(&key, &max) == Ordering::Equal && !self.skip_max {
                        self.inner.last_dup()
                    } else {
                        // Overshot (max absent) or the bound is exclusive:
                        // step back to the previous key's last value.
                        self.inner.prev_nodup()
                    }
                }
                None => self.inner.last(),
            },
        };
        if let Some((key, _)) = &pair {
            if self.before_min(key) {
                pair = None;
            }
        }
        self.settle(pair)
    }

    /// Steps forward; from an unpositioned cursor this is [`Cursor::first`].
    pub fn next(&mut self) -> bool {
        match self.state {
            IterState::Initial => return self.first(),
            IterState::Done => return false,
            IterState::On => {}
        }
        self.stats.record_read();
        let mut pair = self.inner.next();
        if let Some((key, _)) = &pair {
            if self.beyond_max(key) {
                pair = None;
            }
        }
        self.settle(pair)
    }

    /// Steps backward; from an unpositioned cursor this is [`Cursor::last`].
    pub fn prev(&mut self) -> bool {
        match self.state {
            IterState::Initial => return self.last(),
            IterState::Done => return false,
            IterState::On => {}
        }
        self.stats.record_read();
        let mut pair = self.inner.prev();
        if let Some((key, _)) = &pair {
            if self.before_min(key) {
                pair = None;
            }
        }
        self.settle(pair)
    }

    /// Steps forward to the next key, skipping remaining duplicates.
    pub fn next_key(&mut self) -> bool {
        match self.state {
            IterState::Initial => return self.first(),
            IterState::Done => return false,
            IterState::On => {}
        }
        self.stats.record_read();
        let mut pair = self.inner.next_nodup();
        if let Some((key, _)) = &pair {
            if self.beyond_max(key) {
                pair = None;
            }
        }
        self.settle(pair)
    }

    /// Steps backward to the previous key's last duplicate.
    pub fn prev_key(&mut self) -> bool {
        match self.state {
            IterState::Initial => return self.last(),
            IterState::Done => return false,
            IterState::On => {}
        }
        self.stats.record_read();
        let mut pair = self.inner.prev_nodup();
        if let Some((key, _)) = &pair {
            if self.before_min(key) {
                pair = None;
            }
        }
        self.settle(pair)
    }

    /// Moves to the next duplicate value of the current key; `false` (with
    /// the position unchanged) when the key has no further values.
    pub fn next_dup(&mut self) -> bool {
        if self.state != IterState::On {
            return false;
        }
        self.stats.record_read();
        self.inner.next_dup().is_some()
    }

    /// Moves to the previous duplicate value of the current key.
    pub fn prev_dup(&mut self) -> bool {
        if self.state != IterState::On {
            return false;
        }
        self.stats.record_read();
        self.inner.prev_dup().is_some()
    }

    /// Moves to the smallest in-range key `>= key`.
    pub fn seek<'k>(&mut self, key: impl Into<Datum<'k>>) -> Result<bool> {
        let key = key.into().encode().ok_or_else(missing_key)?;
        if let Some(min) = &self.min_key {
            if self.inner.compare(&key, min) == Ordering::Less {
                return Ok(self.first());
            }
        }
        self.stats.record_read();
        let mut pair = self.inner.seek_ge(&key);
        if let Some((found, _)) = &pair {
            if self.beyond_max(found) {
                pair = None;
            }
        }
        Ok(self.settle(pair))
    }

    /// Moves to the exact key, or fails leaving the cursor cleared.
    pub fn seek_exact<'k>(&mut self, key: impl Into<Datum<'k>>) -> Result<bool> {
        let key = key.into().encode().ok_or_else(missing_key)?;
        self.stats.record_read();
        let mut pair = self.inner.seek_exact(&key);
        if let Some((found, _)) = &pair {
            if self.beyond_max(found) || self.before_min(found) {
                pair = None;
            }
        }
        Ok(self.settle(pair))
    }

    /// Whether the cursor is positioned on an entry.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.state == IterState::On
    }

    /// The current key; nil when unpositioned.
    #[must_use]
    pub fn key(&self) -> Value<'s> {
        match self.inner.current() {
            Some((key, _)) => Value::from_arc(key),
            None => Value::nil(),
        }
    }

    /// The current value; nil when unpositioned.
    #[must_use]
    pub fn value(&self) -> Value<'s> {
        match self.inner.current() {
            Some((_, value)) => Value::from_arc(value),
            None => Value::nil(),
        }
    }

    /// Length of the current value in bytes.
    #[must_use]
    pub fn value_len(&self) -> usize {
        self.inner.current().map_or(0, |(_, value)| value.len())
    }

    /// Number of duplicate values at the current key.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.inner.value_count()
    }

    /// Whether the cursor sits on the collection's first entry.
    #[must_use]
    pub fn on_first(&self) -> bool {
        self.inner.on_first()
    }

    /// Whether the cursor sits on the collection's last entry.
    #[must_use]
    pub fn on_last(&self) -> bool {
        self.inner.on_last()
    }

    /// Compares the current key against `other` under the collection's key
    /// order. Unpositioned cursors compare as the empty key.
    pub fn compare_key<'k>(&self, other: impl Into<Datum<'k>>) -> Result<Ordering> {
        let other = other.into().encode().ok_or_else(missing_key)?;
        let key = self.key();
        Ok(self.inner.compare(key.as_bytes(), &other))
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state)
            .field("bounded", &(self.min_key.is_some() || self.max_key.is_some()))
            .finish()
    }
}

/// Forward iterator over a scoped snapshot. See
/// [`CollectionSnapshot::pairs`].
pub struct Pairs<'s> {
    cursor: Cursor<'s>,
    started: bool,
}

impl<'s> Iterator for Pairs<'s> {
    type Item = (Value<'s>, Value<'s>);

    fn next(&mut self) -> Option<Self::Item> {
        let has = if self.started {
            self.cursor.next()
        } else {
            self.started = true;
            self.cursor.first()
        };
        has.then(|| (self.cursor.key(), self.cursor.value()))
    }
}

/// Reverse iterator over a scoped snapshot. See
/// [`CollectionSnapshot::pairs_reversed`].
pub struct PairsReversed<'s> {
    cursor: Cursor<'s>,
    started: bool,
}

impl<'s> Iterator for PairsReversed<'s> {
    type Item = (Value<'s>, Value<'s>);

    fn next(&mut self) -> Option<Self::Item> {
        let has = if self.started {
            self.cursor.prev()
        } else {
            self.started = true;
            self.cursor.last()
        };
        has.then(|| (self.cursor.key(), self.cursor.value()))
    }
}
