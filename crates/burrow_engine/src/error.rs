//! Error types for the storage engine.

use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by the storage engine.
///
/// The first three kinds (`KeyExist`, `NotFound`, `MultipleValues`) are
/// "soft" conditions: callers that passed a conditioning write flag are
/// expected to collapse them into a boolean instead of propagating.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A write flag forbids overwriting and the key (or pair) exists.
    #[error("key already exists")]
    KeyExist,

    /// The requested key, pair, or tree is absent.
    #[error("not found")]
    NotFound,

    /// The operation is incompatible with the duplicate state of the key.
    #[error("key holds multiple values")]
    MultipleValues,

    /// An append was attempted with a key that does not sort after all
    /// existing keys (or a duplicate value that does not sort last).
    #[error("append key out of order")]
    KeyMismatch,

    /// A value or key has the wrong size for its declared format.
    #[error("bad value size: expected {expected} bytes, got {actual}")]
    BadValueSize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// A tree was reopened with options that do not match its stored options.
    #[error("incompatible tree options for {name}")]
    Incompatible {
        /// Name of the tree.
        name: String,
    },

    /// The environment has been closed.
    #[error("environment is closed")]
    Closed,

    /// A transaction handle was used after commit or abort.
    #[error("transaction used after it finished")]
    UseAfterFinish,

    /// Another process holds the environment lock.
    #[error("environment is locked by another process")]
    Locked,

    /// The tree cap configured at open time was reached.
    #[error("tree limit reached: {limit}")]
    TreeLimit {
        /// The configured maximum number of trees.
        limit: usize,
    },

    /// The environment grew past its configured upper size bound.
    #[error("environment full: upper bound {limit} bytes")]
    Full {
        /// The configured upper size bound in bytes.
        limit: u64,
    },

    /// A persisted file failed validation.
    #[error("corrupted data: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// An invalid argument was passed to an engine operation.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the argument issue.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EngineError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a bad value size error.
    pub fn bad_value_size(expected: usize, actual: usize) -> Self {
        Self::BadValueSize { expected, actual }
    }

    /// Returns true for the soft conditions that flag-aware writers
    /// collapse into a boolean.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::KeyExist | Self::NotFound | Self::MultipleValues
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_kinds() {
        assert!(EngineError::KeyExist.is_soft());
        assert!(EngineError::NotFound.is_soft());
        assert!(EngineError::MultipleValues.is_soft());
        assert!(!EngineError::KeyMismatch.is_soft());
        assert!(!EngineError::Closed.is_soft());
    }

    #[test]
    fn display_carries_context() {
        let err = EngineError::bad_value_size(8, 3);
        assert!(err.to_string().contains("expected 8"));
    }
}
