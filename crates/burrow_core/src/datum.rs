//! Polymorphic key/value parameters.

use std::borrow::Cow;

/// A key or value argument to a CRUD operation.
///
/// CRUD calls accept anything convertible into a `Datum`: borrowed bytes,
/// borrowed strings, and 32/64-bit integers (stored native-endian, matching
/// the engine's integer collation). [`Datum::None`] is the "no data"
/// sentinel: as a value it turns `put` into a delete, and as a range end it
/// leaves the bound open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datum<'a> {
    /// The no-data sentinel.
    None,
    /// Borrowed bytes.
    Bytes(&'a [u8]),
    /// Borrowed string, stored as its UTF-8 bytes.
    Str(&'a str),
    /// 32-bit integer, stored as 4 native-endian bytes.
    I32(i32),
    /// 64-bit integer, stored as 8 native-endian bytes.
    I64(i64),
}

impl<'a> Datum<'a> {
    /// Whether this is the no-data sentinel.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Datum::None)
    }

    /// The encoded byte representation, or `None` for the sentinel.
    pub(crate) fn encode(&self) -> Option<Cow<'a, [u8]>> {
        match self {
            Datum::None => None,
            Datum::Bytes(bytes) => Some(Cow::Borrowed(bytes)),
            Datum::Str(s) => Some(Cow::Borrowed(s.as_bytes())),
            Datum::I32(n) => Some(Cow::Owned(n.to_ne_bytes().to_vec())),
            Datum::I64(n) => Some(Cow::Owned(n.to_ne_bytes().to_vec())),
        }
    }
}

impl<'a> From<&'a [u8]> for Datum<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Datum::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Datum<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Datum::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for Datum<'a> {
    fn from(s: &'a str) -> Self {
        Datum::Str(s)
    }
}

impl<'a> From<&'a String> for Datum<'a> {
    fn from(s: &'a String) -> Self {
        Datum::Str(s)
    }
}

impl<'a> From<&'a Vec<u8>> for Datum<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Datum::Bytes(bytes)
    }
}

impl From<i32> for Datum<'_> {
    fn from(n: i32) -> Self {
        Datum::I32(n)
    }
}

impl From<i64> for Datum<'_> {
    fn from(n: i64) -> Self {
        Datum::I64(n)
    }
}

impl From<u32> for Datum<'_> {
    fn from(n: u32) -> Self {
        Datum::I32(n as i32)
    }
}

impl From<u64> for Datum<'_> {
    fn from(n: u64) -> Self {
        Datum::I64(n as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Datum::from(b"abc"), Datum::Bytes(b"abc"));
        assert_eq!(Datum::from("abc"), Datum::Str("abc"));
        assert_eq!(Datum::from(7i32), Datum::I32(7));
        assert_eq!(Datum::from(7i64), Datum::I64(7));
    }

    #[test]
    fn encoding() {
        assert!(Datum::None.encode().is_none());
        assert_eq!(Datum::from("hi").encode().unwrap().as_ref(), b"hi");
        assert_eq!(
            Datum::from(7i32).encode().unwrap().as_ref(),
            7i32.to_ne_bytes()
        );
        assert_eq!(
            Datum::from(-1i64).encode().unwrap().as_ref(),
            (-1i64).to_ne_bytes()
        );
    }
}
