//! Database handle and collection registry.

use crate::collection::{Collection, CollectionOptions};
use crate::error::{Error, Result};
use crate::stats::{DatabaseStats, StatsSnapshot};
use burrow_engine::{Env, EngineError, EnvOptions, Geometry, RemoveMode, Stat};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Options for opening a database.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Create the database if it does not exist.
    pub create_if_missing: bool,
    /// Open read-only; transactions fail.
    pub read_only: bool,
    /// Store the database as sibling files instead of a directory.
    pub no_subdir: bool,
    /// Unix permission bits for a newly created directory.
    pub file_mode: u32,
    /// Size bounds and growth parameters.
    pub geometry: Geometry,
    /// Maximum number of collections.
    pub max_collections: usize,
    /// Fsync the commit log on every commit.
    pub sync_on_commit: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            no_subdir: false,
            file_mode: 0o644,
            geometry: Geometry::default(),
            max_collections: 128,
            sync_on_commit: true,
        }
    }
}

impl DatabaseOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets read-only mode.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the sibling-files layout.
    #[must_use]
    pub const fn no_subdir(mut self, value: bool) -> Self {
        self.no_subdir = value;
        self
    }

    /// Sets the permission bits for a newly created directory.
    #[must_use]
    pub const fn file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    /// Sets the size bounds.
    #[must_use]
    pub const fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Sets the collection cap.
    #[must_use]
    pub const fn max_collections(mut self, value: usize) -> Self {
        self.max_collections = value;
        self
    }

    /// Sets whether commits fsync the log.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    fn env_options(&self) -> EnvOptions {
        EnvOptions::new()
            .create_if_missing(self.create_if_missing)
            .read_only(self.read_only)
            .no_subdir(self.no_subdir)
            .file_mode(self.file_mode)
            .geometry(self.geometry)
            .max_trees(self.max_collections)
            .sync_on_commit(self.sync_on_commit)
    }
}

/// Combined engine and operation statistics.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseStat {
    /// Engine-level figures: collections, entries, bytes, geometry.
    pub engine: Stat,
    /// Operation counters since open.
    pub counters: StatsSnapshot,
}

pub(crate) struct DatabaseShared {
    pub(crate) env: Env,
    pub(crate) collections: RwLock<HashMap<String, Arc<Collection>>>,
    pub(crate) stats: Arc<DatabaseStats>,
}

impl DatabaseShared {
    pub(crate) fn check_open(&self) -> Result<()> {
        if self.env.is_open() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }
}

/// An open database: a set of named [`Collection`]s behind strict
/// snapshot/transaction semantics.
///
/// # Example
///
/// ```rust,ignore
/// use burrow_core::{Database, DatabaseOptions};
///
/// let db = Database::open(Path::new("my_db"), DatabaseOptions::default())?;
/// let stuff = db.collection("stuff")?;
///
/// let txn = db.begin_transaction()?;
/// let view = CollectionTransaction::new(&stuff, &txn)?;
/// view.put("foo", "I am the value of foo")?;
/// drop(view);
/// txn.commit()?;
/// ```
pub struct Database {
    pub(crate) shared: Arc<DatabaseShared>,
}

impl Database {
    /// Opens or creates a database at `path`.
    pub fn open(path: &Path, options: DatabaseOptions) -> Result<Self> {
        let env = Env::open(path, options.env_options())?;
        let shared = Arc::new(DatabaseShared {
            env,
            collections: RwLock::new(HashMap::new()),
            stats: Arc::new(DatabaseStats::default()),
        });
        // Register the database in the engine's user-context slot so code
        // holding only an Env can find its way back.
        let weak: Weak<DatabaseShared> = Arc::downgrade(&shared);
        shared.env.set_user_context(Some(Arc::new(weak)));
        Ok(Self { shared })
    }

    /// The path the database was opened with.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.shared.env.path().to_path_buf()
    }

    /// Whether the database was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.shared.env.is_read_only()
    }

    /// Whether the database is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.env.is_open()
    }

    /// Engine statistics plus operation counters.
    pub fn stats(&self) -> Result<DatabaseStat> {
        Ok(DatabaseStat {
            engine: self.shared.env.stat()?,
            counters: self.shared.stats.snapshot(),
        })
    }

    /// Writes a consistent copy of the database to `path`.
    ///
    /// The copy is checkpointed and compact; `compact` is accepted for
    /// interface parity.
    pub fn copy_to(&self, path: &Path, compact: bool) -> Result<()> {
        self.shared.env.copy_to(path, compact)?;
        Ok(())
    }

    /// Flushes committed data into a checkpoint and truncates the log.
    pub fn checkpoint(&self) -> Result<()> {
        self.shared.env.checkpoint()?;
        Ok(())
    }

    /// Closes the database. Any later operation on this or a derived
    /// object fails with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        self.shared.env.close()?;
        Ok(())
    }

    /// Deletes a closed database's data files, keeping the directory.
    pub fn erase(path: &Path, mode: RemoveMode) -> Result<()> {
        Env::erase(path, !path.is_dir(), mode)?;
        Ok(())
    }

    /// Deletes a database entirely.
    pub fn destroy(path: &Path, mode: RemoveMode) -> Result<()> {
        Env::destroy(path, !path.is_dir(), mode)?;
        Ok(())
    }

    /// Gets or opens a collection, creating it with default sorts
    /// (lexical keys, single blob values) if it does not exist.
    ///
    /// An existing collection is returned with its stored sorts, whatever
    /// they are; use [`Database::open_collection`] to validate them.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.shared.check_open()?;
        if let Some(existing) = self.shared.collections.read().get(name) {
            return Ok(existing.clone());
        }

        // Adopt a pre-existing collection with its stored options.
        let found = {
            let snap = self.shared.env.begin_ro()?;
            match snap.open_tree(name) {
                Ok(found) => Some(found),
                Err(EngineError::NotFound) => None,
                Err(err) => return Err(err.into()),
            }
        };
        match found {
            Some((dbi, stored)) => self.register(name, dbi, stored, true),
            None => self.open_collection(name, CollectionOptions::new()),
        }
    }

    /// Opens a collection with explicit options.
    ///
    /// Fails with [`Error::Incompatible`] if the collection exists with
    /// different sorts, and [`Error::NotFound`] if it is absent and
    /// `options.create` is unset.
    pub fn open_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Arc<Collection>> {
        self.shared.check_open()?;
        let tree_options = options.tree_options();

        if let Some(existing) = self.shared.collections.read().get(name) {
            if existing.key_sort() != options.key_sort
                || existing.value_sort() != options.value_sort
            {
                return Err(Error::Incompatible { name: name.into() });
            }
            return Ok(existing.clone());
        }

        let found = {
            let snap = self.shared.env.begin_ro()?;
            match snap.open_tree(name) {
                Ok(found) => Some(found),
                Err(EngineError::NotFound) => None,
                Err(err) => return Err(err.into()),
            }
        };

        match found {
            Some((dbi, stored)) => {
                if stored != tree_options {
                    return Err(Error::Incompatible { name: name.into() });
                }
                self.register(name, dbi, stored, true)
            }
            None => {
                if !options.create {
                    return Err(Error::NotFound);
                }
                let txn = self.shared.env.begin_rw()?;
                let (dbi, created) = txn.open_tree(name, Some(tree_options), true)?;
                txn.commit()?;
                self.register(name, dbi, tree_options, !created)
            }
        }
    }

    /// Creates a collection, failing with [`Error::KeyExist`] if it
    /// already exists.
    pub fn create_collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Result<Arc<Collection>> {
        self.shared.check_open()?;
        if self.shared.collections.read().contains_key(name) {
            return Err(Error::KeyExist);
        }
        {
            let snap = self.shared.env.begin_ro()?;
            if snap.open_tree(name).is_ok() {
                return Err(Error::KeyExist);
            }
        }
        self.open_collection(name, options.create(true))
    }

    /// Looks up an already-open or on-disk collection without creating it.
    pub fn get_collection(&self, name: &str) -> Result<Option<Arc<Collection>>> {
        self.shared.check_open()?;
        if let Some(existing) = self.shared.collections.read().get(name) {
            return Ok(Some(existing.clone()));
        }
        let snap = self.shared.env.begin_ro()?;
        match snap.open_tree(name) {
            Ok((dbi, stored)) => Some(self.register(name, dbi, stored, true)).transpose(),
            Err(EngineError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn register(
        &self,
        name: &str,
        dbi: burrow_engine::Dbi,
        options: burrow_engine::TreeOptions,
        initialized: bool,
    ) -> Result<Arc<Collection>> {
        let mut table = self.shared.collections.write();
        if let Some(existing) = table.get(name) {
            return Ok(existing.clone());
        }
        let collection = Arc::new(Collection::new(
            name.to_string(),
            dbi,
            options,
            initialized,
            &self.shared,
            self.shared.stats.clone(),
        ));
        table.insert(name.to_string(), collection.clone());
        Ok(collection)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.shared.env.path())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
