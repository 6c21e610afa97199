//! Environment: an open database on disk.
//!
//! File system layout (default, one directory per environment):
//!
//! ```text
//! <path>/
//! ├─ DATA    # checkpoint snapshot
//! ├─ LOG     # commit log since the last checkpoint
//! └─ LOCK    # advisory lock; held exclusively while the env is open
//! ```
//!
//! With the `no_subdir` option, `<path>` itself is the checkpoint file and
//! the siblings are `<path>.log` / `<path>.lock`.
//!
//! The LOCK file gives the environment exclusive ownership of the files for
//! the lifetime of the process that opened it; a second open (from any
//! process) fails with `Locked`.

use crate::catalog::CommittedState;
use crate::error::{EngineError, EngineResult};
use crate::flags::RemoveMode;
use crate::log::{self, LogFile};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Size bounds and growth parameters.
///
/// The engine enforces `size_upper` at commit time; the remaining fields are
/// retained for compatibility with page-mapped deployments and surfaced in
/// [`Stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Lower size bound in bytes.
    pub size_lower: u64,
    /// Upper size bound in bytes; commits that would exceed it fail `Full`.
    pub size_upper: u64,
    /// Growth step in bytes.
    pub growth_step: u64,
    /// Shrink threshold in bytes.
    pub shrink_threshold: u64,
    /// Nominal page size in bytes.
    pub page_size: u64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            size_lower: 1 << 20,
            size_upper: 1 << 30,
            growth_step: 1 << 20,
            shrink_threshold: 2 << 20,
            page_size: 4096,
        }
    }
}

/// Options for opening an environment.
#[derive(Debug, Clone)]
pub struct EnvOptions {
    /// Create the environment if it does not exist.
    pub create_if_missing: bool,
    /// Open read-only; write transactions fail.
    pub read_only: bool,
    /// Store files next to `path` instead of inside it.
    pub no_subdir: bool,
    /// Unix permission bits applied to a newly created directory.
    pub file_mode: u32,
    /// Size bounds.
    pub geometry: Geometry,
    /// Maximum number of trees.
    pub max_trees: usize,
    /// Fsync the commit log on every commit.
    pub sync_on_commit: bool,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            no_subdir: false,
            file_mode: 0o644,
            geometry: Geometry::default(),
            max_trees: 128,
            sync_on_commit: true,
        }
    }
}

impl EnvOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the environment if missing.
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

    /// Sets the no-subdirectory layout.
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

    /// Sets the geometry.
    #[must_use]
    pub const fn geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Sets the tree cap.
    #[must_use]
    pub const fn max_trees(mut self, value: usize) -> Self {
        self.max_trees = value;
        self
    }

    /// Sets whether commits fsync the log.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

/// Environment statistics.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// Number of trees.
    pub trees: usize,
    /// Total number of values across all trees (duplicates counted).
    pub entries: u64,
    /// Approximate bytes held by keys and values.
    pub bytes_used: u64,
    /// Bytes in the commit log since the last checkpoint.
    pub log_bytes: u64,
    /// Configured geometry.
    pub geometry: Geometry,
    /// Configured tree cap.
    pub max_trees: usize,
}

/// Resolved file locations for an environment.
#[derive(Debug, Clone)]
pub(crate) struct EnvPaths {
    pub(crate) data: PathBuf,
    pub(crate) log: PathBuf,
    pub(crate) lock: PathBuf,
}

impl EnvPaths {
    pub(crate) fn resolve(path: &Path, no_subdir: bool) -> Self {
        if no_subdir {
            Self {
                data: path.to_path_buf(),
                log: sibling(path, ".log"),
                lock: sibling(path, ".lock"),
            }
        } else {
            Self {
                data: path.join("DATA"),
                log: path.join("LOG"),
                lock: path.join("LOCK"),
            }
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Blocks writers so at most one write transaction exists at a time.
#[derive(Default)]
pub(crate) struct WriterGate {
    busy: Mutex<bool>,
    cv: Condvar,
}

impl WriterGate {
    /// Blocks until the gate is free, then takes it.
    pub(crate) fn acquire(&self) {
        let mut busy = self.busy.lock();
        while *busy {
            self.cv.wait(&mut busy);
        }
        *busy = true;
    }

    pub(crate) fn release(&self) {
        let mut busy = self.busy.lock();
        *busy = false;
        self.cv.notify_one();
    }
}

pub(crate) struct EnvInner {
    pub(crate) path: PathBuf,
    pub(crate) paths: EnvPaths,
    pub(crate) options: EnvOptions,
    /// Held for the lifetime of the environment.
    _lock_file: File,
    pub(crate) state: RwLock<Arc<CommittedState>>,
    /// `None` in read-only mode.
    pub(crate) log: Mutex<Option<LogFile>>,
    pub(crate) writer: WriterGate,
    pub(crate) open: AtomicBool,
    pub(crate) txn_ids: AtomicU64,
    user_ctx: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Drop for EnvInner {
    fn drop(&mut self) {
        // Best-effort checkpoint so a clean drop leaves no log to replay.
        if self.open.load(Ordering::SeqCst) && !self.options.read_only {
            let state = self.state.read().clone();
            if log::write_checkpoint(&self.paths.data, &state).is_ok() {
                if let Some(log_file) = self.log.lock().as_mut() {
                    let _ = log_file.truncate();
                }
            }
        }
    }
}

/// Handle to an open environment. Cheap to clone.
#[derive(Clone)]
pub struct Env {
    pub(crate) inner: Arc<EnvInner>,
}

impl Env {
    /// Opens or creates an environment at `path`.
    pub fn open(path: &Path, options: EnvOptions) -> EngineResult<Self> {
        if !options.no_subdir {
            if !path.exists() {
                if !options.create_if_missing {
                    return Err(EngineError::invalid_argument(format!(
                        "environment does not exist: {}",
                        path.display()
                    )));
                }
                fs::create_dir_all(path)?;
                apply_file_mode(path, options.file_mode);
            } else if !path.is_dir() {
                return Err(EngineError::invalid_argument(format!(
                    "path is not a directory: {}",
                    path.display()
                )));
            }
        } else if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if !options.create_if_missing {
                    return Err(EngineError::invalid_argument(
                        "environment parent directory does not exist",
                    ));
                }
                fs::create_dir_all(parent)?;
            }
        }

        let paths = EnvPaths::resolve(path, options.no_subdir);
        if !options.create_if_missing && !paths.data.exists() && !paths.log.exists() {
            return Err(EngineError::invalid_argument(
                "environment does not exist and create_if_missing is false",
            ));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&paths.lock)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(EngineError::Locked);
        }

        let mut state = log::read_checkpoint(&paths.data)?.unwrap_or_default();
        let replayed = log::replay_log(&paths.log, &mut state)?;
        if replayed > 0 {
            debug!(frames = replayed, "recovered commits from log");
        }

        let log_file = if options.read_only {
            None
        } else {
            Some(LogFile::open(&paths.log)?)
        };

        Ok(Self {
            inner: Arc::new(EnvInner {
                path: path.to_path_buf(),
                paths,
                options,
                _lock_file: lock_file,
                state: RwLock::new(Arc::new(state)),
                log: Mutex::new(log_file),
                writer: WriterGate::default(),
                open: AtomicBool::new(true),
                txn_ids: AtomicU64::new(1),
                user_ctx: RwLock::new(None),
            }),
        })
    }

    /// Returns the path the environment was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the open options.
    #[must_use]
    pub fn options(&self) -> &EnvOptions {
        &self.inner.options
    }

    /// Whether the environment was opened read-only.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.options.read_only
    }

    /// Whether the environment is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub(crate) fn check_open(&self) -> EngineResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::Closed)
        }
    }

    /// Environment statistics.
    pub fn stat(&self) -> EngineResult<Stat> {
        self.check_open()?;
        let state = self.inner.state.read().clone();
        let log_bytes = match self.inner.log.lock().as_ref() {
            Some(log_file) => log_file.size()?,
            None => 0,
        };
        Ok(Stat {
            trees: state.catalog.len(),
            entries: state.total_entries(),
            bytes_used: state.total_bytes(),
            log_bytes,
            geometry: self.inner.options.geometry,
            max_trees: self.inner.options.max_trees,
        })
    }

    /// Stores the process-wide user context.
    pub fn set_user_context(&self, ctx: Option<Arc<dyn Any + Send + Sync>>) {
        *self.inner.user_ctx.write() = ctx;
    }

    /// Returns the process-wide user context.
    #[must_use]
    pub fn user_context(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.user_ctx.read().clone()
    }

    /// Writes a checkpoint and truncates the commit log.
    pub fn checkpoint(&self) -> EngineResult<()> {
        self.check_open()?;
        if self.inner.options.read_only {
            return Ok(());
        }
        self.inner.writer.acquire();
        let result = self.checkpoint_locked();
        self.inner.writer.release();
        result
    }

    fn checkpoint_locked(&self) -> EngineResult<()> {
        let state = self.inner.state.read().clone();
        log::write_checkpoint(&self.inner.paths.data, &state)?;
        if let Some(log_file) = self.inner.log.lock().as_mut() {
            log_file.truncate()?;
        }
        Ok(())
    }

    /// Fsyncs the commit log.
    pub fn sync(&self) -> EngineResult<()> {
        self.check_open()?;
        if let Some(log_file) = self.inner.log.lock().as_mut() {
            log_file.sync()?;
        }
        Ok(())
    }

    /// Writes a consistent copy of the environment to `path`.
    ///
    /// The copy is a checkpoint snapshot and therefore always compact; the
    /// `compact` flag is accepted for interface parity.
    pub fn copy_to(&self, path: &Path, compact: bool) -> EngineResult<()> {
        let _ = compact;
        self.check_open()?;
        let target = EnvPaths::resolve(path, self.inner.options.no_subdir);
        if target.data.exists() {
            return Err(EngineError::invalid_argument(format!(
                "copy target already exists: {}",
                target.data.display()
            )));
        }
        if !self.inner.options.no_subdir {
            fs::create_dir_all(path)?;
        }
        let state = self.inner.state.read().clone();
        log::write_checkpoint(&target.data, &state)
    }

    /// Checkpoints and closes the environment.
    ///
    /// Any later operation through this or a derived handle fails `Closed`.
    pub fn close(&self) -> EngineResult<()> {
        if !self.is_open() {
            return Ok(());
        }
        if !self.inner.options.read_only {
            self.inner.writer.acquire();
            let result = self.checkpoint_locked();
            self.inner.writer.release();
            result?;
        }
        self.inner.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Deletes the data files of a closed environment, keeping the
    /// directory itself.
    pub fn erase(path: &Path, no_subdir: bool, mode: RemoveMode) -> EngineResult<()> {
        let paths = EnvPaths::resolve(path, no_subdir);
        let _guard = acquire_for_removal(&paths, mode)?;
        remove_if_exists(&paths.data)?;
        remove_if_exists(&paths.log)?;
        Ok(())
    }

    /// Deletes an environment entirely, including its directory.
    pub fn destroy(path: &Path, no_subdir: bool, mode: RemoveMode) -> EngineResult<()> {
        let paths = EnvPaths::resolve(path, no_subdir);
        {
            let _guard = acquire_for_removal(&paths, mode)?;
            remove_if_exists(&paths.data)?;
            remove_if_exists(&paths.log)?;
        }
        remove_if_exists(&paths.lock)?;
        if !no_subdir && path.is_dir() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    pub(crate) fn next_txn_id(&self) -> u64 {
        self.inner.txn_ids.fetch_add(1, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .field("read_only", &self.is_read_only())
            .finish_non_exhaustive()
    }
}

fn acquire_for_removal(paths: &EnvPaths, mode: RemoveMode) -> EngineResult<Option<File>> {
    if mode == RemoveMode::Force || !paths.lock.exists() {
        return Ok(None);
    }
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&paths.lock)?;
    match mode {
        RemoveMode::Force => Ok(None),
        RemoveMode::RequireUnused => {
            if lock_file.try_lock_exclusive().is_err() {
                return Err(EngineError::Locked);
            }
            Ok(Some(lock_file))
        }
        RemoveMode::WaitForUnused => {
            lock_file.lock_exclusive()?;
            Ok(Some(lock_file))
        }
    }
}

fn remove_if_exists(path: &Path) -> EngineResult<()> {
    if path.exists() && path.is_file() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(unix)]
fn apply_file_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    // Directories need the execute bit alongside the configured read/write bits.
    let dir_mode = mode | 0o111;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(dir_mode));
}

#[cfg(not(unix))]
fn apply_file_mode(_path: &Path, _mode: u32) {}
