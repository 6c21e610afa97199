//! Write flags and maintenance modes.

/// Flags conditioning a `put`.
///
/// The default (`PutFlags::upsert()`) stores the value unconditionally:
/// replacing the existing value in a single-valued tree, or adding a
/// duplicate in a duplicate-keyed tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutFlags {
    /// Fail with `KeyExist` if the key already exists.
    pub no_overwrite: bool,
    /// Fail with `NotFound` if the key does not exist; in a duplicate-keyed
    /// tree with more than one value, fail with `MultipleValues`.
    pub current: bool,
    /// The key must sort strictly after every existing key (`KeyMismatch`
    /// otherwise). Bypasses the search on the hot append path.
    pub append: bool,
    /// In a duplicate-keyed tree, replace *all* values at the key with the
    /// single given value.
    pub all_dups: bool,
    /// In a duplicate-keyed tree, fail with `KeyExist` if the exact
    /// key/value pair already exists.
    pub no_dup_data: bool,
    /// The value must sort strictly after every existing value at the key
    /// (`KeyMismatch` otherwise).
    pub append_dup: bool,
}

impl PutFlags {
    /// Unconditional upsert.
    #[must_use]
    pub const fn upsert() -> Self {
        Self {
            no_overwrite: false,
            current: false,
            append: false,
            all_dups: false,
            no_dup_data: false,
            append_dup: false,
        }
    }

    /// Sets the insert-only flag.
    #[must_use]
    pub const fn no_overwrite(mut self, value: bool) -> Self {
        self.no_overwrite = value;
        self
    }

    /// Sets the update-only flag.
    #[must_use]
    pub const fn current(mut self, value: bool) -> Self {
        self.current = value;
        self
    }

    /// Sets the append-key flag.
    #[must_use]
    pub const fn append(mut self, value: bool) -> Self {
        self.append = value;
        self
    }

    /// Sets the replace-all-duplicates flag.
    #[must_use]
    pub const fn all_dups(mut self, value: bool) -> Self {
        self.all_dups = value;
        self
    }

    /// Sets the no-duplicate-pair flag.
    #[must_use]
    pub const fn no_dup_data(mut self, value: bool) -> Self {
        self.no_dup_data = value;
        self
    }

    /// Sets the append-duplicate flag.
    #[must_use]
    pub const fn append_dup(mut self, value: bool) -> Self {
        self.append_dup = value;
        self
    }
}

/// How `Env::erase` / `Env::destroy` treat a live environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
    /// Remove without checking the lock.
    Force,
    /// Fail with `Locked` if another process holds the environment.
    RequireUnused,
    /// Block until the environment is released, then remove.
    WaitForUnused,
}
