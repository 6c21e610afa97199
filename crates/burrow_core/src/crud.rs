//! CRUD operations on scoped views.
//!
//! Reads exist on both [`CollectionSnapshot`] and [`CollectionTransaction`]
//! (the latter sees its own writes); mutations exist on
//! [`CollectionTransaction`] only.
//!
//! Soft failures (`KeyExist`, `NotFound`, `MultipleValues`) conditioned by
//! a write flag collapse to `false`/`None`; getters return a nil
//! [`Value`] on a miss. Everything else propagates as a typed error.
//!
//! Every single-entry mutation runs the collection's change-hook chain with
//! the displaced and stored values. Because the engine's plain `put` on a
//! single-valued tree does not need to reveal the prior value, the hook
//! path routes upserts through `replace`, which swaps atomically and
//! returns the old value; insert-only paths stay on plain `put` since the
//! presence check guarantees there is nothing to report.

use crate::collection::{Change, Collection};
use crate::datum::Datum;
use crate::error::{soften, Error, Result};
use crate::scoped::{CollectionSnapshot, CollectionTransaction, ReadHandle};
use crate::value::Value;
use burrow_engine::PutFlags;

fn missing_value() -> Error {
    Error::Engine(burrow_engine::EngineError::invalid_argument(
        "a value is required",
    ))
}

fn read_get<'s>(coll: &Collection, read: ReadHandle<'s>, key: Datum<'_>) -> Result<Value<'s>> {
    let key = coll.encode_key(key)?;
    coll.stats().record_read();
    let bytes = read.get(coll.dbi(), &key)?;
    Ok(Value::from_option(bytes))
}

fn read_get_ge<'s>(
    coll: &Collection,
    read: ReadHandle<'s>,
    key: Datum<'_>,
) -> Result<(Value<'s>, Value<'s>)> {
    let key = coll.encode_key(key)?;
    coll.stats().record_read();
    match read.get_ge(coll.dbi(), &key)? {
        Some((found_key, value)) => Ok((Value::from_arc(found_key), Value::from_arc(value))),
        None => Ok((Value::nil(), Value::nil())),
    }
}

fn read_with<R>(
    coll: &Collection,
    read: ReadHandle<'_>,
    key: Datum<'_>,
    f: impl FnOnce(&[u8]) -> R,
) -> Result<Option<R>> {
    let key = coll.encode_key(key)?;
    coll.stats().record_read();
    Ok(read.get(coll.dbi(), &key)?.map(|bytes| f(&bytes)))
}

impl<'s> CollectionSnapshot<'s> {
    /// Returns the value stored at `key`, or a nil view on a miss.
    pub fn get<'k>(&self, key: impl Into<Datum<'k>>) -> Result<Value<'s>> {
        read_get(self.collection(), self.read(), key.into())
    }

    /// Returns the smallest entry with a key `>= key`; both views are nil
    /// on a miss.
    pub fn get_greater_or_equal<'k>(
        &self,
        key: impl Into<Datum<'k>>,
    ) -> Result<(Value<'s>, Value<'s>)> {
        read_get_ge(self.collection(), self.read(), key.into())
    }

    /// Calls `f` with the value bytes if the key is present.
    pub fn get_with<'k, R>(
        &self,
        key: impl Into<Datum<'k>>,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<Option<R>> {
        read_with(self.collection(), self.read(), key.into(), f)
    }
}

impl<'t> CollectionTransaction<'t> {
    /// Returns the value stored at `key`, seeing this transaction's own
    /// writes; nil on a miss.
    pub fn get<'k>(&self, key: impl Into<Datum<'k>>) -> Result<Value<'t>> {
        read_get(self.collection(), self.read(), key.into())
    }

    /// Returns the smallest entry with a key `>= key`.
    pub fn get_greater_or_equal<'k>(
        &self,
        key: impl Into<Datum<'k>>,
    ) -> Result<(Value<'t>, Value<'t>)> {
        read_get_ge(self.collection(), self.read(), key.into())
    }

    /// Calls `f` with the value bytes if the key is present.
    pub fn get_with<'k, R>(
        &self,
        key: impl Into<Datum<'k>>,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<Option<R>> {
        read_with(self.collection(), self.read(), key.into(), f)
    }

    fn notify(&self, key: &[u8], old: Option<&[u8]>, new: Option<&[u8]>, flags: PutFlags) {
        let change = Change {
            txn: self.engine(),
            key,
            old_value: old,
            new_value: new,
            flags,
        };
        self.collection().hooks().notify(&change);
    }

    /// The conditioned write shared by every put flavor. Returns `false`
    /// on a flag-induced refusal.
    fn write(&self, key: &[u8], value: &[u8], flags: PutFlags) -> Result<bool> {
        let coll = self.collection();
        coll.stats().record_write();
        let dbi = self.dbi();
        let txn = self.engine();

        if coll.hooks().is_empty() {
            return Ok(soften(txn.put(dbi, key, value, flags).map_err(Error::from))?.is_some());
        }

        // Hook path. A plain upsert on a single-valued collection swaps
        // through `replace` to capture the displaced value atomically.
        if !coll.allows_duplicates() && flags == PutFlags::upsert() {
            let old = txn.replace(dbi, key, Some(value))?;
            self.notify(key, old.as_deref(), Some(value), flags);
            return Ok(true);
        }

        let Some(outcome) = soften(txn.put(dbi, key, value, flags).map_err(Error::from))? else {
            return Ok(false);
        };
        if outcome.stored.is_some() {
            self.notify(key, outcome.old.as_deref(), Some(value), flags);
        }
        Ok(true)
    }

    /// Upserts `key -> value`. A [`Datum::None`] value deletes the key.
    pub fn put<'k, 'v>(
        &self,
        key: impl Into<Datum<'k>>,
        value: impl Into<Datum<'v>>,
    ) -> Result<()> {
        let key = key.into();
        let value = value.into();
        let Some(value) = value.encode() else {
            self.del(key)?;
            return Ok(());
        };
        let key = self.collection().encode_key(key)?;
        self.write(&key, &value, PutFlags::upsert())?;
        Ok(())
    }

    /// Inserts only if absent: the key for single-valued collections, the
    /// exact pair for duplicate-keyed ones. Returns `false` if blocked.
    pub fn insert<'k, 'v>(
        &self,
        key: impl Into<Datum<'k>>,
        value: impl Into<Datum<'v>>,
    ) -> Result<bool> {
        let key = self.collection().encode_key(key.into())?;
        let value = value.into().encode().ok_or_else(missing_value)?;
        let flags = if self.collection().allows_duplicates() {
            PutFlags::upsert().no_dup_data(true)
        } else {
            PutFlags::upsert().no_overwrite(true)
        };
        self.write(&key, &value, flags)
    }

    /// Replaces only if present. Returns `false` if the key is absent.
    pub fn update<'k, 'v>(
        &self,
        key: impl Into<Datum<'k>>,
        value: impl Into<Datum<'v>>,
    ) -> Result<bool> {
        let key = self.collection().encode_key(key.into())?;
        let value = value.into().encode().ok_or_else(missing_value)?;
        self.write(&key, &value, PutFlags::upsert().current(true))
    }

    /// As [`CollectionTransaction::update`], additionally returning the
    /// owned prior value. `None` means the key was absent and nothing was
    /// written.
    pub fn update_and_get<'k, 'v>(
        &self,
        key: impl Into<Datum<'k>>,
        value: impl Into<Datum<'v>>,
    ) -> Result<Option<Vec<u8>>> {
        let coll = self.collection();
        coll.stats().record_write();
        let key = coll.encode_key(key.into())?;
        let value = value.into().encode().ok_or_else(missing_value)?;
        let flags = PutFlags::upsert().current(true);
        let txn = self.engine();

        let Some(outcome) = soften(
            txn.put(self.dbi(), &key, &value, flags)
                .map_err(Error::from),
        )?
        else {
            return Ok(None);
        };
        if !coll.hooks().is_empty() && outcome.stored.is_some() {
            self.notify(&key, outcome.old.as_deref(), Some(value.as_ref()), flags);
        }
        Ok(Some(
            outcome.old.map(|old| old.to_vec()).unwrap_or_default(),
        ))
    }

    /// Optimized write of a key that sorts strictly after every existing
    /// key. Fails with [`Error::KeyMismatch`] otherwise.
    pub fn append<'k, 'v>(
        &self,
        key: impl Into<Datum<'k>>,
        value: impl Into<Datum<'v>>,
    ) -> Result<()> {
        let key = self.collection().encode_key(key.into())?;
        let value = value.into().encode().ok_or_else(missing_value)?;
        self.write(&key, &value, PutFlags::upsert().append(true))?;
        Ok(())
    }

    /// Conditioned write with an explicit flag set. Returns `false` on a
    /// flag-induced refusal (`KeyExist`, `NotFound`, `MultipleValues`).
    pub fn put_with_flags<'k, 'v>(
        &self,
        key: impl Into<Datum<'k>>,
        value: impl Into<Datum<'v>>,
        flags: PutFlags,
    ) -> Result<bool> {
        let key = self.collection().encode_key(key.into())?;
        let value = value.into().encode().ok_or_else(missing_value)?;
        self.write(&key, &value, flags)
    }

    /// Reserves `len` bytes and lets `fill` write the value in place.
    ///
    /// Fires the change-hook chain with the filled value on success.
    pub fn put_reserve<'k>(
        &self,
        key: impl Into<Datum<'k>>,
        len: usize,
        flags: PutFlags,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<bool> {
        let coll = self.collection();
        coll.stats().record_write();
        let key = coll.encode_key(key.into())?;
        let txn = self.engine();

        let Some(outcome) = soften(
            txn.put_reserve(self.dbi(), &key, len, flags, fill)
                .map_err(Error::from),
        )?
        else {
            return Ok(false);
        };
        if !coll.hooks().is_empty() {
            if let Some(stored) = &outcome.stored {
                self.notify(&key, outcome.old.as_deref(), Some(stored.as_ref()), flags);
            }
        }
        Ok(true)
    }

    /// Bulk insert of `count` equal-sized values under one key. Requires a
    /// fixed-size duplicate-value collection, and
    /// `values.len() % count == 0`.
    ///
    /// Known limitation: this path does **not** fire change hooks, so any
    /// index over this collection goes stale until rebuilt.
    pub fn put_duplicates<'k>(
        &self,
        key: impl Into<Datum<'k>>,
        values: &[u8],
        count: usize,
        flags: PutFlags,
    ) -> Result<usize> {
        let coll = self.collection();
        coll.stats().record_write();
        let key = coll.encode_key(key.into())?;
        Ok(self
            .engine()
            .put_multiple(self.dbi(), &key, values, count, flags)?)
    }

    /// Deletes `key` and every value stored under it. Returns whether the
    /// key existed.
    pub fn del<'k>(&self, key: impl Into<Datum<'k>>) -> Result<bool> {
        let coll = self.collection();
        coll.stats().record_delete();
        let key = coll.encode_key(key.into())?;
        let removed = self.engine().del_key(self.dbi(), &key)?;
        if !coll.hooks().is_empty() {
            // One event per removed value keeps index diffing exact for
            // duplicate-keyed sources.
            for old in &removed {
                self.notify(&key, Some(old.as_ref()), None, PutFlags::upsert());
            }
        }
        Ok(!removed.is_empty())
    }

    /// Deletes the exact `(key, value)` pair. Returns whether it existed.
    pub fn del_value<'k, 'v>(
        &self,
        key: impl Into<Datum<'k>>,
        value: impl Into<Datum<'v>>,
    ) -> Result<bool> {
        let coll = self.collection();
        coll.stats().record_delete();
        let key = coll.encode_key(key.into())?;
        let value = value.into().encode().ok_or_else(missing_value)?;
        let existed = self.engine().del_pair(self.dbi(), &key, &value)?;
        if existed && !coll.hooks().is_empty() {
            self.notify(&key, Some(value.as_ref()), None, PutFlags::upsert());
        }
        Ok(existed)
    }

    /// As [`CollectionTransaction::del`], additionally returning the owned
    /// prior value. `None` means the key was absent.
    pub fn del_and_get<'k>(&self, key: impl Into<Datum<'k>>) -> Result<Option<Vec<u8>>> {
        let coll = self.collection();
        coll.stats().record_delete();
        let key = coll.encode_key(key.into())?;
        let removed = self.engine().del_key(self.dbi(), &key)?;
        if !coll.hooks().is_empty() {
            for old in &removed {
                self.notify(&key, Some(old.as_ref()), None, PutFlags::upsert());
            }
        }
        Ok(removed.into_iter().next().map(|old| old.to_vec()))
    }
}
