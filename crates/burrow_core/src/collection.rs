//! Collections and change hooks.
//!
//! A [`Collection`] is a named key/value namespace of the database. It
//! declares how keys (and, for duplicate-keyed collections, values) sort,
//! and owns a chain of change hooks that observe every single-entry
//! mutation. The secondary-index subsystem is built entirely on this chain.

use crate::database::DatabaseShared;
use crate::datum::Datum;
use crate::error::{Error, Result};
use crate::stats::DatabaseStats;
use burrow_engine::{Dbi, DupOptions, PutFlags, RwTxn, SortOrder, TreeOptions};
use parking_lot::RwLock;
use std::borrow::Cow;
use std::sync::{Arc, Weak};

/// How a collection orders its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySort {
    /// Lexicographic, first byte to last.
    Lexical,
    /// Lexicographic from the last byte toward the first.
    ReverseLexical,
    /// Native-endian 4- or 8-byte unsigned integers.
    Integer,
}

impl KeySort {
    pub(crate) fn order(self) -> SortOrder {
        match self {
            KeySort::Lexical => SortOrder::Lexical,
            KeySort::ReverseLexical => SortOrder::ReverseLexical,
            KeySort::Integer => SortOrder::Integer,
        }
    }

    fn from_order(order: SortOrder) -> Self {
        match order {
            SortOrder::Lexical => KeySort::Lexical,
            SortOrder::ReverseLexical => KeySort::ReverseLexical,
            SortOrder::Integer => KeySort::Integer,
        }
    }
}

/// How a collection stores and orders its values.
///
/// Anything other than [`ValueSort::Blob`] enables duplicate keys: the
/// values under one key form a sorted set under the declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSort {
    /// One opaque value per key.
    Blob,
    /// Sorted duplicate values, lexicographic.
    Lexical,
    /// Sorted duplicate values, reverse-lexicographic.
    ReverseLexical,
    /// Sorted duplicate values of one fixed size (learned from the first
    /// insert), lexicographic.
    Fixed,
    /// Sorted duplicate values of native-endian integers (fixed width).
    Integer,
}

impl ValueSort {
    pub(crate) fn dup_options(self) -> Option<DupOptions> {
        match self {
            ValueSort::Blob => None,
            ValueSort::Lexical => Some(DupOptions {
                order: SortOrder::Lexical,
                fixed: false,
            }),
            ValueSort::ReverseLexical => Some(DupOptions {
                order: SortOrder::ReverseLexical,
                fixed: false,
            }),
            ValueSort::Fixed => Some(DupOptions {
                order: SortOrder::Lexical,
                fixed: true,
            }),
            ValueSort::Integer => Some(DupOptions {
                order: SortOrder::Integer,
                fixed: true,
            }),
        }
    }

    fn from_dup(dup: Option<DupOptions>) -> Self {
        match dup {
            None => ValueSort::Blob,
            Some(DupOptions {
                order: SortOrder::Integer,
                ..
            }) => ValueSort::Integer,
            Some(DupOptions {
                order: SortOrder::ReverseLexical,
                ..
            }) => ValueSort::ReverseLexical,
            Some(DupOptions { fixed: true, .. }) => ValueSort::Fixed,
            Some(_) => ValueSort::Lexical,
        }
    }
}

/// Options for opening a collection.
#[derive(Debug, Clone, Copy)]
pub struct CollectionOptions {
    /// Create the collection if it does not exist.
    pub create: bool,
    /// Key ordering.
    pub key_sort: KeySort,
    /// Value storage/ordering; non-`Blob` enables duplicate keys.
    pub value_sort: ValueSort,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            create: true,
            key_sort: KeySort::Lexical,
            value_sort: ValueSort::Blob,
        }
    }
}

impl CollectionOptions {
    /// Creates options with default values (create, lexical keys, blob
    /// values).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the collection if missing.
    #[must_use]
    pub const fn create(mut self, value: bool) -> Self {
        self.create = value;
        self
    }

    /// Sets the key ordering.
    #[must_use]
    pub const fn key_sort(mut self, value: KeySort) -> Self {
        self.key_sort = value;
        self
    }

    /// Sets the value storage/ordering.
    #[must_use]
    pub const fn value_sort(mut self, value: ValueSort) -> Self {
        self.value_sort = value;
        self
    }

    pub(crate) fn tree_options(&self) -> TreeOptions {
        TreeOptions {
            key_order: self.key_sort.order(),
            duplicates: self.value_sort.dup_options(),
        }
    }
}

/// One mutation, as seen by a change hook.
///
/// `old_value` is `None` for inserts; `new_value` is `None` for deletes.
/// The hook receives the raw engine transaction handle and may mutate the
/// database through it, including re-entrantly on the same collection.
pub struct Change<'t> {
    /// The raw engine write transaction the mutation happened in.
    pub txn: &'t RwTxn,
    /// The mutated key.
    pub key: &'t [u8],
    /// The value displaced by the mutation, if any.
    pub old_value: Option<&'t [u8]>,
    /// The value stored by the mutation, if any.
    pub new_value: Option<&'t [u8]>,
    /// The flags the write was issued with.
    pub flags: PutFlags,
}

/// What a hook wants done with itself after an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Keep the hook registered.
    Keep,
    /// Remove the hook from the chain.
    Unregister,
}

/// A change hook. Invoked synchronously after each single-entry mutation.
pub type ChangeHook = Arc<dyn Fn(&Change<'_>) -> HookOutcome + Send + Sync>;

/// A collection's hook chain. Hooks run in reverse registration order.
pub(crate) struct ChangeHooks {
    chain: RwLock<Vec<ChangeHook>>,
}

impl ChangeHooks {
    fn new() -> Self {
        Self {
            chain: RwLock::new(Vec::new()),
        }
    }

    fn add(&self, hook: ChangeHook) {
        self.chain.write().push(hook);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chain.read_recursive().is_empty()
    }

    /// Invokes the chain, last-registered first.
    ///
    /// The chain is cloned out of the lock before invocation so hooks may
    /// re-enter the same collection. Hooks returning
    /// [`HookOutcome::Unregister`] are removed afterwards.
    pub(crate) fn notify(&self, change: &Change<'_>) {
        let chain: Vec<ChangeHook> = self.chain.read_recursive().clone();
        let mut dead: Vec<ChangeHook> = Vec::new();
        for hook in chain.iter().rev() {
            if hook(change) == HookOutcome::Unregister {
                dead.push(hook.clone());
            }
        }
        if !dead.is_empty() {
            self.chain
                .write()
                .retain(|hook| !dead.iter().any(|d| Arc::ptr_eq(hook, d)));
        }
    }
}

/// A named key/value namespace.
///
/// At most one `Collection` instance exists per name per open database;
/// repeated opens return the same shared instance.
pub struct Collection {
    name: String,
    dbi: Dbi,
    key_sort: KeySort,
    value_sort: ValueSort,
    /// Whether the collection existed on disk before this database opened
    /// it. A freshly created collection reports `false`, which is what
    /// triggers an index rebuild.
    initialized: bool,
    hooks: ChangeHooks,
    db: Weak<DatabaseShared>,
    stats: Arc<DatabaseStats>,
}

impl Collection {
    pub(crate) fn new(
        name: String,
        dbi: Dbi,
        options: TreeOptions,
        initialized: bool,
        db: &Arc<DatabaseShared>,
        stats: Arc<DatabaseStats>,
    ) -> Self {
        Self {
            name,
            dbi,
            key_sort: KeySort::from_order(options.key_order),
            value_sort: ValueSort::from_dup(options.duplicates),
            initialized,
            hooks: ChangeHooks::new(),
            db: Arc::downgrade(db),
            stats,
        }
    }

    /// The collection's name, unique within its database.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key ordering.
    #[must_use]
    pub fn key_sort(&self) -> KeySort {
        self.key_sort
    }

    /// Value storage/ordering.
    #[must_use]
    pub fn value_sort(&self) -> ValueSort {
        self.value_sort
    }

    /// Whether the collection stores multiple values per key.
    #[must_use]
    pub fn allows_duplicates(&self) -> bool {
        self.value_sort != ValueSort::Blob
    }

    /// Whether the collection existed before this database opened it.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Registers a change hook. Hooks run in reverse registration order.
    pub fn add_change_hook(&self, hook: ChangeHook) {
        self.hooks.add(hook);
    }

    pub(crate) fn dbi(&self) -> Dbi {
        self.dbi
    }

    pub(crate) fn hooks(&self) -> &ChangeHooks {
        &self.hooks
    }

    pub(crate) fn stats(&self) -> &Arc<DatabaseStats> {
        &self.stats
    }

    pub(crate) fn db(&self) -> Result<Arc<DatabaseShared>> {
        self.db.upgrade().ok_or(Error::Closed)
    }

    /// Encodes a key argument; the no-data sentinel is not a legal key.
    pub(crate) fn encode_key<'a>(&self, key: Datum<'a>) -> Result<Cow<'a, [u8]>> {
        key.encode().ok_or_else(|| {
            Error::Engine(burrow_engine::EngineError::invalid_argument(
                "a key is required",
            ))
        })
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("key_sort", &self.key_sort)
            .field("value_sort", &self.value_sort)
            .finish_non_exhaustive()
    }
}
