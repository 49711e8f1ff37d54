//! Byte-string primitives (§4.A).
//!
//! `Bytes` is an immutable, small-buffer-optimized byte string: short keys
//! (≤ [`INLINE_BYTES`] bytes) live inline, longer ones spill to the heap.
//! Ordering and equality are always lexicographic on unsigned bytes.

use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;

/// Inline buffer size for [`Bytes`], matching `ServerConfig::bytestring_inline_bytes`
/// (§4.A names 32 bytes as the example threshold).
pub const INLINE_BYTES: usize = 32;

/// An immutable byte string with small-buffer optimization.
///
/// Cloning a `Bytes` that fits inline is a memcpy; cloning one that has
/// spilled to the heap allocates. Either way, equality and ordering only ever
/// look at the byte content, never at which storage branch is active.
#[derive(Clone, Default)]
pub struct Bytes(SmallVec<[u8; INLINE_BYTES]>);

impl Bytes {
    /// Build a `Bytes` by copying a borrowed byte slice. Copies into the
    /// inline buffer when `bytes.len() <= INLINE_BYTES`, else heap-allocates.
    pub fn copy_from(bytes: &[u8]) -> Self {
        Bytes(SmallVec::from_slice(bytes))
    }

    /// Build a `Bytes` from an owned `Vec<u8>` without copying (may still be
    /// "inline-eligible" in length but this constructor always takes the
    /// vec's existing heap allocation as-is).
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Bytes(SmallVec::from_vec(bytes))
    }

    /// Borrow the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if this byte string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if this value currently lives in its inline buffer (no heap
    /// allocation). Used by the small-string-optimization property test.
    pub fn is_inline(&self) -> bool {
        !self.0.spilled()
    }

    /// Concatenate two byte strings into a new one.
    pub fn concat(a: &[u8], b: &[u8]) -> Self {
        let mut v = SmallVec::with_capacity(a.len() + b.len());
        v.extend_from_slice(a);
        v.extend_from_slice(b);
        Bytes(v)
    }

    /// Parse the bytes as a decimal, signed 64-bit integer.
    ///
    /// Used by the `count`/`sum` source-range variants (§4.E) to interpret
    /// stored values numerically. Non-UTF-8 or non-numeric content is an
    /// error rather than a silent zero, so a corrupt sink value surfaces
    /// instead of quietly resetting an aggregate.
    pub fn parse_i64(&self) -> Option<i64> {
        std::str::from_utf8(&self.0).ok()?.trim().parse::<i64>().ok()
    }

    /// Format a signed 64-bit integer as decimal `Bytes`.
    pub fn from_i64(value: i64) -> Self {
        Bytes::copy_from(value.to_string().as_bytes())
    }

    /// The lexicographically smallest possible byte string of a given
    /// length: `width` zero bytes. Used to derive `ibegin` for an unbound
    /// slot (§4.C).
    pub fn zeros(width: usize) -> Self {
        Bytes(SmallVec::from_elem(0u8, width))
    }

    /// The lexicographically smallest byte string that is strictly greater
    /// than every `width`-byte string: `width` `0xFF` bytes, one past the
    /// last representable value, with the carry-propagated "one past" bump
    /// applied by the caller composing ranges across multiple segments (see
    /// `pattern::range_for`).
    pub fn ones(width: usize) -> Self {
        Bytes(SmallVec::from_elem(0xFFu8, width))
    }
}

impl PartialEq for Bytes {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Bytes {}

impl PartialOrd for Bytes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bytes {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.as_slice().cmp(other.0.as_slice())
    }
}

impl std::hash::Hash for Bytes {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_slice().hash(state);
    }
}

impl From<&[u8]> for Bytes {
    fn from(bytes: &[u8]) -> Self {
        Bytes::copy_from(bytes)
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Bytes::copy_from(s.as_bytes())
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from_vec(bytes)
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}
