//! Error types for the typed layer.

use burrow_engine::EngineError;
use std::io;
use thiserror::Error;

/// Result type for BurrowDB operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by BurrowDB.
///
/// The soft kinds (`KeyExist`, `NotFound`, `MultipleValues`) rarely escape:
/// flag-aware writers collapse them into a `false` return and getters into a
/// nil [`crate::Value`]. Everything else propagates.
#[derive(Debug, Error)]
pub enum Error {
    /// A write flag forbids overwriting and the key (or pair) exists.
    #[error("key already exists")]
    KeyExist,

    /// The requested key or collection is absent.
    #[error("not found")]
    NotFound,

    /// The operation is incompatible with the duplicate state of the key.
    #[error("key holds multiple values")]
    MultipleValues,

    /// An `append` was given a key that does not sort after all existing
    /// keys.
    #[error("append key out of order")]
    KeyMismatch,

    /// A typed conversion was applied to a value of the wrong size.
    #[error("bad value size: expected {expected} bytes, got {actual}")]
    BadValueSize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// A collection was reopened with a different key or value sort.
    #[error("incompatible sort options for collection {name}")]
    Incompatible {
        /// Name of the collection.
        name: String,
    },

    /// The database has been closed.
    #[error("database is closed")]
    Closed,

    /// A snapshot or transaction handle was used after it finished.
    #[error("snapshot or transaction used after it finished")]
    UseAfterFinish,

    /// Another process holds the database lock.
    #[error("database is locked by another process")]
    Locked,

    /// The collection cap configured at open time was reached.
    #[error("collection limit reached: {limit}")]
    CollectionLimit {
        /// The configured maximum number of collections.
        limit: usize,
    },

    /// The database grew past its configured upper size bound.
    #[error("database full: upper bound {limit} bytes")]
    Full {
        /// The configured upper size bound in bytes.
        limit: u64,
    },

    /// A persisted file or stored value failed validation.
    #[error("corrupt data: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Any other engine-reported failure.
    #[error("engine error: {0}")]
    Engine(EngineError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Returns true for the soft conditions that collapse into booleans.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::KeyExist | Self::NotFound | Self::MultipleValues)
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::KeyExist => Self::KeyExist,
            EngineError::NotFound => Self::NotFound,
            EngineError::MultipleValues => Self::MultipleValues,
            EngineError::KeyMismatch => Self::KeyMismatch,
            EngineError::BadValueSize { expected, actual } => {
                Self::BadValueSize { expected, actual }
            }
            EngineError::Incompatible { name } => Self::Incompatible { name },
            EngineError::Closed => Self::Closed,
            EngineError::UseAfterFinish => Self::UseAfterFinish,
            EngineError::Locked => Self::Locked,
            EngineError::TreeLimit { limit } => Self::CollectionLimit { limit },
            EngineError::Full { limit } => Self::Full { limit },
            EngineError::Corrupted { message } => Self::Corrupt { message },
            EngineError::Io(err) => Self::Io(err),
            other => Self::Engine(other),
        }
    }
}

/// Collapses a soft failure into `Ok(None)`, propagating everything else.
pub(crate) fn soften<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_soft() => Ok(None),
        Err(err) => Err(err),
    }
}
