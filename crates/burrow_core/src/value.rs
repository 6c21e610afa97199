//! Zero-copy value views.

use crate::error::{Error, Result};
use std::marker::PhantomData;
use std::sync::Arc;

/// A read-only view of a stored value.
///
/// A `Value` is tied to the scoped snapshot or transaction that produced it
/// and cannot outlive it; the borrow checker enforces this through the `'a`
/// lifetime. Internally the bytes are reference-counted, so views stay
/// valid while hooks mutate the same transaction re-entrantly.
///
/// `Value` is deliberately not `Clone`: escaping the scope requires an
/// explicit copy via [`Value::to_vec`].
///
/// Getters return a *nil* view on a miss; see [`Value::is_nil`].
pub struct Value<'a> {
    bytes: Option<Arc<[u8]>>,
    _scope: PhantomData<&'a ()>,
}

impl<'a> Value<'a> {
    /// The nil view, returned by getters on a miss.
    #[must_use]
    pub(crate) fn nil() -> Self {
        Self {
            bytes: None,
            _scope: PhantomData,
        }
    }

    pub(crate) fn from_arc(bytes: Arc<[u8]>) -> Self {
        Self {
            bytes: Some(bytes),
            _scope: PhantomData,
        }
    }

    pub(crate) fn from_option(bytes: Option<Arc<[u8]>>) -> Self {
        Self {
            bytes,
            _scope: PhantomData,
        }
    }

    /// Whether this view refers to no value at all (a missed lookup).
    ///
    /// Distinct from an empty value: `put(k, b"")` stores a present,
    /// zero-length value.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.bytes.is_none()
    }

    /// Whether the view exists and refers to an actual value.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.bytes.is_some()
    }

    /// Length in bytes; 0 for nil.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, |b| b.len())
    }

    /// Whether the view is nil or zero-length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw bytes; empty for nil.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.as_deref().unwrap_or(&[])
    }

    /// Copies the bytes out of the view's scope.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Interprets the value as UTF-8.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(self.as_bytes())
            .map_err(|_| Error::corrupt("value is not valid UTF-8"))
    }

    /// Interprets the value as a native-endian `i32`.
    pub fn as_i32(&self) -> Result<i32> {
        Ok(i32::from_ne_bytes(self.fixed::<4>()?))
    }

    /// Interprets the value as a native-endian `i64`.
    pub fn as_i64(&self) -> Result<i64> {
        Ok(i64::from_ne_bytes(self.fixed::<8>()?))
    }

    /// Interprets the value as a native-endian `u32`.
    pub fn as_u32(&self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.fixed::<4>()?))
    }

    /// Interprets the value as a native-endian `u64`.
    pub fn as_u64(&self) -> Result<u64> {
        Ok(u64::from_ne_bytes(self.fixed::<8>()?))
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        let bytes = self.as_bytes();
        bytes.try_into().map_err(|_| Error::BadValueSize {
            expected: N,
            actual: bytes.len(),
        })
    }
}

impl std::fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.bytes {
            None => write!(f, "Value(nil)"),
            Some(bytes) => write!(f, "Value({} bytes)", bytes.len()),
        }
    }
}

impl PartialEq<[u8]> for Value<'_> {
    fn eq(&self, other: &[u8]) -> bool {
        self.exists() && self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for Value<'_> {
    fn eq(&self, other: &&[u8]) -> bool {
        self == *other
    }
}

impl PartialEq<str> for Value<'_> {
    fn eq(&self, other: &str) -> bool {
        self == other.as_bytes()
    }
}

impl PartialEq<&str> for Value<'_> {
    fn eq(&self, other: &&str) -> bool {
        self == (*other).as_bytes()
    }
}
