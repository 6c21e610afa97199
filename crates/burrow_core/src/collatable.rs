//! Collatable encoding.
//!
//! An order-preserving binary encoding for tuples of heterogeneous items
//! (null, bool, 64-bit int, byte string). Concatenated item encodings,
//! compared byte for byte, order exactly like the semantic tuples:
//!
//! 1. item by item, first unequal pair decides;
//! 2. equal prefixes: the longer tuple is greater;
//! 3. across types: `null < bool < int < string`.
//!
//! This lets the engine sort compound index keys with its plain byte
//! comparator, with no per-index comparator callback.
//!
//! Each item starts with a tag byte carrying the type and, for integers,
//! the payload length:
//!
//! | Item | Encoding |
//! |---|---|
//! | null | `0x00` |
//! | false / true | `0x01` / `0x02` |
//! | int < 0 | `0x10 + (8 - n)`, then n-byte big-endian two's complement with leading `0xFF` suppressed |
//! | int >= 0 | `0x20 + n`, then n-byte big-endian with leading `0x00` suppressed (zero is `0x20` alone) |
//! | string | `0x30`, raw bytes, `0x00` terminator |
//!
//! Strings must not contain `0x00`; this is a documented precondition, not
//! an escaped encoding.

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_NEG_BASE: u8 = 0x10;
const TAG_NONNEG_BASE: u8 = 0x20;
const TAG_STRING: u8 = 0x30;
const STRING_END: u8 = 0x00;

/// An encoded, order-preserving tuple of items.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Collatable {
    buf: Vec<u8>,
}

impl Collatable {
    /// Creates an empty tuple.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a null item.
    pub fn add_null(&mut self) -> &mut Self {
        self.buf.push(TAG_NULL);
        self
    }

    /// Appends a bool item.
    pub fn add_bool(&mut self, value: bool) -> &mut Self {
        self.buf.push(if value { TAG_TRUE } else { TAG_FALSE });
        self
    }

    /// Appends a signed 64-bit integer item.
    pub fn add_i64(&mut self, value: i64) -> &mut Self {
        let bytes = value.to_be_bytes();
        if value < 0 {
            // Suppress leading 0xFF while the remainder still sign-extends
            // back to the value. Shorter payloads are numerically larger, so
            // the larger tag byte keeps byte order aligned with numeric
            // order on the negative side.
            let mut start = 0;
            while start < 7 && bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0 {
                start += 1;
            }
            let payload = &bytes[start..];
            self.buf.push(TAG_NEG_BASE + (8 - payload.len()) as u8);
            self.buf.extend_from_slice(payload);
        } else {
            let mut start = 0;
            while start < 8 && bytes[start] == 0 {
                start += 1;
            }
            let payload = &bytes[start..];
            self.buf.push(TAG_NONNEG_BASE + payload.len() as u8);
            self.buf.extend_from_slice(payload);
        }
        self
    }

    /// Appends a string item.
    ///
    /// Precondition: `s` must not contain a NUL byte.
    pub fn add_str(&mut self, s: &str) -> &mut Self {
        self.add_bytes(s.as_bytes())
    }

    /// Appends a byte-string item.
    ///
    /// Precondition: `bytes` must not contain `0x00`.
    pub fn add_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        debug_assert!(
            !bytes.contains(&STRING_END),
            "collatable strings must not contain NUL"
        );
        self.buf.push(TAG_STRING);
        self.buf.extend_from_slice(bytes);
        self.buf.push(STRING_END);
        self
    }

    /// Appends all items of another tuple.
    pub fn concat(&mut self, other: &Collatable) -> &mut Self {
        self.buf.extend_from_slice(&other.buf);
        self
    }

    /// Removes all items.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the tuple holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The encoded bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the tuple, returning the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Lazily decodes the items.
    #[must_use]
    pub fn items(&self) -> Items<'_> {
        Items::new(&self.buf)
    }

    /// Decodes items from raw encoded bytes (e.g. an index value).
    #[must_use]
    pub fn items_in(bytes: &[u8]) -> Items<'_> {
        Items::new(bytes)
    }

    /// The item at position `index`, walking from the start.
    ///
    /// Positions past the end yield the null sentinel, which sorts below
    /// every real item.
    #[must_use]
    pub fn get(&self, index: usize) -> Item<'_> {
        self.items().nth(index).unwrap_or(Item::Null)
    }
}

impl From<&str> for Collatable {
    fn from(s: &str) -> Self {
        let mut c = Collatable::new();
        c.add_str(s);
        c
    }
}

impl From<i64> for Collatable {
    fn from(value: i64) -> Self {
        let mut c = Collatable::new();
        c.add_i64(value);
        c
    }
}

impl From<bool> for Collatable {
    fn from(value: bool) -> Self {
        let mut c = Collatable::new();
        c.add_bool(value);
        c
    }
}

/// A decoded item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item<'a> {
    /// The null item (also the past-the-end sentinel).
    Null,
    /// A bool item.
    Bool(bool),
    /// An integer item.
    Int(i64),
    /// A byte-string item.
    Bytes(&'a [u8]),
}

impl<'a> Item<'a> {
    /// The string item as UTF-8, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Item::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// The integer item, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Item::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Lazy item decoder. Stops at the first malformed byte.
pub struct Items<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Items<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Remaining undecoded bytes.
    #[must_use]
    pub fn remainder(&self) -> &'a [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }
}

impl<'a> Iterator for Items<'a> {
    type Item = Item<'a>;

    fn next(&mut self) -> Option<Item<'a>> {
        let tag = *self.buf.get(self.pos)?;
        self.pos += 1;
        match tag {
            TAG_NULL => Some(Item::Null),
            TAG_FALSE => Some(Item::Bool(false)),
            TAG_TRUE => Some(Item::Bool(true)),
            t if (TAG_NEG_BASE..TAG_NEG_BASE + 8).contains(&t) => {
                let len = 8 - usize::from(t - TAG_NEG_BASE);
                let payload = self.buf.get(self.pos..self.pos + len)?;
                self.pos += len;
                let mut bytes = [0xFFu8; 8];
                bytes[8 - len..].copy_from_slice(payload);
                Some(Item::Int(i64::from_be_bytes(bytes)))
            }
            t if (TAG_NONNEG_BASE..=TAG_NONNEG_BASE + 8).contains(&t) => {
                let len = usize::from(t - TAG_NONNEG_BASE);
                let payload = self.buf.get(self.pos..self.pos + len)?;
                self.pos += len;
                let mut bytes = [0u8; 8];
                bytes[8 - len..].copy_from_slice(payload);
                Some(Item::Int(i64::from_be_bytes(bytes)))
            }
            TAG_STRING => {
                let rest = &self.buf[self.pos..];
                let end = rest.iter().position(|&b| b == STRING_END)?;
                let bytes = &rest[..end];
                self.pos += end + 1;
                Some(Item::Bytes(bytes))
            }
            _ => None,
        }
    }
}


#[cfg(test)]
mod ordering_law {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering;

    #[derive(Debug, Clone, PartialEq)]
    enum OwnedItem {
        Null,
        Bool(bool),
        Int(i64),
        Str(Vec<u8>),
    }

    fn type_rank(item: &OwnedItem) -> u8 {
        match item {
            OwnedItem::Null => 0,
            OwnedItem::Bool(_) => 1,
            OwnedItem::Int(_) => 2,
            OwnedItem::Str(_) => 3,
        }
    }

    fn semantic_cmp_item(a: &OwnedItem, b: &OwnedItem) -> Ordering {
        match (a, b) {
            (OwnedItem::Null, OwnedItem::Null) => Ordering::Equal,
            (OwnedItem::Bool(x), OwnedItem::Bool(y)) => x.cmp(y),
            (OwnedItem::Int(x), OwnedItem::Int(y)) => x.cmp(y),
            (OwnedItem::Str(x), OwnedItem::Str(y)) => x.cmp(y),
            _ => type_rank(a).cmp(&type_rank(b)),
        }
    }

    fn semantic_cmp(a: &[OwnedItem], b: &[OwnedItem]) -> Ordering {
        for (x, y) in a.iter().zip(b.iter()) {
            match semantic_cmp_item(x, y) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        a.len().cmp(&b.len())
    }

    fn encode(items: &[OwnedItem]) -> Collatable {
        let mut c = Collatable::new();
        for item in items {
            match item {
                OwnedItem::Null => c.add_null(),
                OwnedItem::Bool(b) => c.add_bool(*b),
                OwnedItem::Int(n) => c.add_i64(*n),
                OwnedItem::Str(s) => c.add_bytes(s),
            };
        }
        c
    }

    fn item_strategy() -> impl Strategy<Value = OwnedItem> {
        prop_oneof![
            Just(OwnedItem::Null),
            any::<bool>().prop_map(OwnedItem::Bool),
            any::<i64>().prop_map(OwnedItem::Int),
            proptest::collection::vec(1u8..=255, 0..6).prop_map(OwnedItem::Str),
        ]
    }

    fn tuple_strategy() -> impl Strategy<Value = Vec<OwnedItem>> {
        proptest::collection::vec(item_strategy(), 0..4)
    }

    proptest! {
        #[test]
        fn byte_order_matches_tuple_order(a in tuple_strategy(), b in tuple_strategy()) {
            let ea = encode(&a);
            let eb = encode(&b);
            prop_assert_eq!(ea.bytes().cmp(eb.bytes()), semantic_cmp(&a, &b));
        }

        #[test]
        fn decode_inverts_encode(a in tuple_strategy()) {
            let encoded = encode(&a);
            let decoded: Vec<OwnedItem> = encoded
                .items()
                .map(|item| match item {
                    Item::Null => OwnedItem::Null,
                    Item::Bool(b) => OwnedItem::Bool(b),
                    Item::Int(n) => OwnedItem::Int(n),
                    Item::Bytes(s) => OwnedItem::Str(s.to_vec()),
                })
                .collect();
            prop_assert_eq!(decoded, a);
        }
    }
}
