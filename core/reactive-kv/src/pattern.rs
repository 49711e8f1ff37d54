//! Join key patterns, partial matches, and range derivation (§4.C).
//!
//! A pattern is a `|`-delimited sequence of fields, mirroring the
//! pipe-separated key convention used throughout the scenarios in the
//! design doc (`timeline|alice|1`, `events|T1|a`, ...). Each field is either
//! a literal run of bytes or a named slot with a fixed byte width, written
//! `NAME:WIDTH` (e.g. `U:8`). The `|` separators are themselves literal
//! bytes in the resulting key — they are re-inserted between fields when a
//! pattern is expanded, since real keys use them as field delimiters.
//!
//! Slot widths are fixed once a pattern is parsed and never vary at
//! runtime, so every pattern has a statically known total byte width.

use crate::bytestring::Bytes;
use crate::error::{EngineError, EngineResult};
use std::collections::BTreeMap;

/// One segment of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(Bytes),
    Slot { name: String, width: usize },
}

/// A parsed join key pattern: literal runs and named, fixed-width slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

/// A partial assignment of slot names to byte values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match {
    bindings: BTreeMap<String, Bytes>,
}

impl Match {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Bytes) {
        self.bindings.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: Bytes) -> Self {
        self.bind(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

impl Pattern {
    /// Parse a `|`-delimited pattern string. Fields are split on the byte
    /// `|`; a field matching `NAME:WIDTH` (name is `[A-Za-z_][A-Za-z0-9_]*`,
    /// width is a positive decimal integer) is a slot, anything else
    /// (including an empty field, which arises from a leading/trailing `|`)
    /// is a literal. The `|` bytes between fields are literal separators and
    /// are preserved in the parsed pattern.
    pub fn parse(text: &str) -> EngineResult<Pattern> {
        let fields: Vec<&str> = text.split('|').collect();
        let mut segments = Vec::new();
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                segments.push(Segment::Literal(Bytes::from("|")));
            }
            match parse_slot_field(field) {
                Some((name, width)) => segments.push(Segment::Slot { name, width }),
                None => {
                    if !field.is_empty() {
                        segments.push(Segment::Literal(Bytes::from(*field)));
                    } else if i == 0 || i + 1 == fields.len() {
                        // Preserve an empty leading/trailing field as a
                        // zero-length literal so `|foo|` parses as three
                        // segments (empty, slot-or-literal foo, empty)
                        // rather than silently dropping the boundary.
                        segments.push(Segment::Literal(Bytes::from("")));
                    }
                }
            }
        }
        let p = Pattern { segments: merge_literals(segments) };
        p.validate_unique_widths()?;
        Ok(p)
    }

    fn validate_unique_widths(&self) -> EngineResult<()> {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for seg in &self.segments {
            if let Segment::Slot { name, width } = seg {
                if let Some(prev) = seen.insert(name, *width) {
                    if prev != *width {
                        return Err(EngineError::SlotWidthMismatch {
                            join: String::new(),
                            slot: name.to_string(),
                            a: prev,
                            b: *width,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Total byte width of any key matching this pattern.
    pub fn total_width(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(b) => b.len(),
                Segment::Slot { width, .. } => *width,
            })
            .sum()
    }

    /// Names of the slots referenced by this pattern, in left-to-right order
    /// (a name may repeat if the same slot appears more than once).
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Slot { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// The table a pattern is meant to be matched against, taken from the
    /// leading literal run up to its first `|` (e.g. `"posts"` for
    /// `posts|U:5|`). Patterns that begin with a slot have no derivable
    /// table name.
    pub fn table_name(&self) -> Option<String> {
        match self.segments.first() {
            Some(Segment::Literal(b)) => {
                let s = String::from_utf8_lossy(b.as_bytes());
                let name = s.split('|').next().unwrap_or("");
                if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                }
            }
            _ => None,
        }
    }

    pub fn slot_width(&self, name: &str) -> Option<usize> {
        self.segments.iter().find_map(|s| match s {
            Segment::Slot { name: n, width } if n == name => Some(*width),
            _ => None,
        })
    }

    /// Fill a concrete key from a fully (or partially — unbound slots error)
    /// bound match.
    pub fn expand(&self, m: &Match) -> EngineResult<Bytes> {
        let mut out = Vec::with_capacity(self.total_width());
        for seg in &self.segments {
            match seg {
                Segment::Literal(b) => out.extend_from_slice(b.as_bytes()),
                Segment::Slot { name, width } => {
                    let v = m.get(name).ok_or_else(|| EngineError::InvalidJoin {
                        message: format!("slot '{name}' is unbound during expand"),
                    })?;
                    if v.len() != *width {
                        return Err(EngineError::InvalidJoin {
                            message: format!(
                                "slot '{name}' expected width {width}, got {}",
                                v.len()
                            ),
                        });
                    }
                    out.extend_from_slice(v.as_bytes());
                }
            }
        }
        Ok(Bytes::from_vec(out))
    }

    /// Attempt to extract slot values from a concrete key. Fails if the key
    /// length doesn't match the pattern's fixed total width or if a literal
    /// segment's bytes disagree.
    pub fn try_match(&self, key: &[u8]) -> Option<Match> {
        if key.len() != self.total_width() {
            return None;
        }
        let mut m = Match::new();
        let mut pos = 0;
        for seg in &self.segments {
            match seg {
                Segment::Literal(b) => {
                    let lit = b.as_bytes();
                    if &key[pos..pos + lit.len()] != lit {
                        return None;
                    }
                    pos += lit.len();
                }
                Segment::Slot { name, width } => {
                    let value = Bytes::copy_from(&key[pos..pos + width]);
                    m.bind(name.clone(), value);
                    pos += width;
                }
            }
        }
        Some(m)
    }

    /// Derive the half-open byte range `[ibegin, iend)` of all concrete keys
    /// consistent with `partial`. Bound slots and literals contribute exact
    /// bytes; each unbound slot contributes `0x00...` to `ibegin` and
    /// `0xFF...` to the working upper bound, which is then converted from an
    /// inclusive maximum to an exclusive `iend` via byte-string successor
    /// (carry-propagated increment, extending by one byte on full overflow).
    pub fn range_for(&self, partial: &Match) -> (Bytes, Bytes) {
        let mut lo = Vec::with_capacity(self.total_width());
        let mut hi_inclusive = Vec::with_capacity(self.total_width());
        for seg in &self.segments {
            match seg {
                Segment::Literal(b) => {
                    lo.extend_from_slice(b.as_bytes());
                    hi_inclusive.extend_from_slice(b.as_bytes());
                }
                Segment::Slot { name, width } => match partial.get(name) {
                    Some(v) => {
                        lo.extend_from_slice(v.as_bytes());
                        hi_inclusive.extend_from_slice(v.as_bytes());
                    }
                    None => {
                        lo.extend_from_slice(Bytes::zeros(*width).as_bytes());
                        hi_inclusive.extend_from_slice(Bytes::ones(*width).as_bytes());
                    }
                },
            }
        }
        let hi = successor(&hi_inclusive);
        (Bytes::from_vec(lo), Bytes::from_vec(hi))
    }
}

/// The lexicographically smallest byte string strictly greater than
/// `bytes`, computed by incrementing the rightmost non-`0xFF` byte and
/// truncating everything after it. If every byte is `0xFF`, no value of the
/// same-or-shorter length can exceed it, so the string is extended by one
/// more `0xFF` byte (an extension of an all-`0xFF` prefix always compares
/// greater under lexicographic order).
fn successor(bytes: &[u8]) -> Vec<u8> {
    let mut v = bytes.to_vec();
    for i in (0..v.len()).rev() {
        if v[i] != 0xFF {
            v[i] += 1;
            v.truncate(i + 1);
            return v;
        }
    }
    v.push(0xFF);
    v
}

fn parse_slot_field(field: &str) -> Option<(String, usize)> {
    let (name, width) = field.split_once(':')?;
    if name.is_empty()
        || !name.chars().next().unwrap().is_ascii_alphabetic() && name.chars().next().unwrap() != '_'
    {
        return None;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let width: usize = width.parse().ok()?;
    if width == 0 {
        return None;
    }
    Some((name.to_string(), width))
}

fn merge_literals(segments: Vec<Segment>) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match (&seg, out.last_mut()) {
            (Segment::Literal(b), Some(Segment::Literal(prev))) => {
                *prev = Bytes::concat(prev.as_bytes(), b.as_bytes());
            }
            _ => out.push(seg),
        }
    }
    out
}
