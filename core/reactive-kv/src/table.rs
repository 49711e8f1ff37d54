//! Tables (§4.B): an ordered key/value map plus the range index of
//! notifiers subscribed to slices of its key space.
//!
//! Single-threaded, reentrancy-free by construction: writing a key snapshots
//! the overlapping notifiers *before* invoking any of them, so a notifier
//! that (indirectly, through the materialization controller) triggers a
//! further write to a different table never observes or mutates this
//! table's index mid-iteration.

use crate::bytestring::Bytes;
use crate::error::EngineResult;
use crate::join::Join;
use crate::range_index::{RangeHandle, RangeIndex};
use crate::source_range::{SinkEffect, SourceRange};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// The value half of a stored row. A thin wrapper rather than a bare
/// `Bytes` so a future collaborator can attach per-row bookkeeping (a
/// version stamp, a source tag) without changing every call site's type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datum(pub Bytes);

/// What happened to a key as the result of one write, as seen by the
/// notifiers subscribed over it.
///
/// `Unchanged` is a real variant (the Open Question in §9 resolves to this
/// rather than a sentinel byte value) precisely so a write that replaces a
/// value with an identical one costs nothing beyond the lookup: no notifier
/// fires, no sink key is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    Insert(Bytes),
    Erase(Bytes),
    Update { old: Bytes, new: Bytes },
    Unchanged,
}

/// The outcome a [`Table::modify`] callback chooses for a key, given its
/// current value (`None` if absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifyOutcome {
    /// Upsert the key to this value.
    Set(Bytes),
    /// Remove the key, if present.
    Erase,
    /// Leave the key and its notifiers untouched.
    Unchanged,
}

/// A subscriber registered over a range of a table's key space. Currently
/// the only kind is a join's source range; the enum leaves room for a
/// future non-join observer without disturbing `Table`'s API.
pub enum Notifier {
    SourceRange(Rc<RefCell<SourceRange>>),
}

/// An ordered table: key/value storage plus the notifiers materialized
/// joins have registered against it.
pub struct Table {
    name: String,
    data: BTreeMap<Bytes, Datum>,
    index: RangeIndex,
    /// Disjoint, merged `[lo, hi)` intervals known to be fully materialized.
    /// A lazily-materialized join only backfills a requested range if it
    /// isn't already covered here (§4.G).
    validity: Vec<(Bytes, Bytes)>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            data: BTreeMap::new(),
            index: RangeIndex::new(),
            validity: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Bytes> {
        self.data.get_key(key).map(|d| &d.0)
    }

    /// All rows with key in `[lo, hi)`, in key order.
    pub fn scan(&self, lo: &[u8], hi: &[u8]) -> impl Iterator<Item = (&Bytes, &Bytes)> {
        self.data
            .range(Bytes::copy_from(lo)..Bytes::copy_from(hi))
            .map(|(k, d)| (k, &d.0))
    }

    pub fn register(&mut self, notifier: Notifier) -> RangeHandle {
        match notifier {
            Notifier::SourceRange(sr) => self.index.insert(sr),
        }
    }

    pub fn unregister(&mut self, handle: RangeHandle) {
        self.index.remove(handle);
    }

    /// Set `key` to `value` (`Some`) or remove it (`None`), then dispatch
    /// the resulting [`Modification`] to every notifier whose range
    /// contains `key`. Returns each notifier's join and the effect it wants
    /// applied to its sink; the caller (the materialization controller) is
    /// responsible for routing each effect to the right sink table, which
    /// is what lets one write cascade through a chain of joins.
    pub fn write(
        &mut self,
        key: Bytes,
        value: Option<Bytes>,
    ) -> EngineResult<Vec<(Rc<Join>, SinkEffect)>> {
        let modification = match (self.data.get(&key), &value) {
            (None, None) => Modification::Unchanged,
            (None, Some(v)) => Modification::Insert(v.clone()),
            (Some(d), None) => Modification::Erase(d.0.clone()),
            (Some(d), Some(v)) if d.0 == *v => Modification::Unchanged,
            (Some(d), Some(v)) => Modification::Update {
                old: d.0.clone(),
                new: v.clone(),
            },
        };

        match value {
            Some(v) => {
                self.data.insert(key.clone(), Datum(v));
            }
            None => {
                self.data.remove(&key);
            }
        }

        if modification == Modification::Unchanged {
            return Ok(Vec::new());
        }

        // Snapshot before dispatching: a notifier's effect is applied by the
        // caller to some *other* table, never back into this one within the
        // same `write` call, but snapshotting keeps that guarantee even if a
        // future notifier kind re-registers itself on invocation.
        let matching = self.index.overlap(key.as_bytes());
        let mut effects = Vec::with_capacity(matching.len());
        for sr in matching {
            let (join, effect) = {
                let mut sr = sr.borrow_mut();
                let join = Rc::clone(sr.join());
                let effect = sr.notify(&key, modification.clone())?;
                (join, effect)
            };
            effects.push((join, effect));
        }
        Ok(effects)
    }

    pub fn insert(
        &mut self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> EngineResult<Vec<(Rc<Join>, SinkEffect)>> {
        self.write(key.into(), Some(value.into()))
    }

    pub fn erase(&mut self, key: impl Into<Bytes>) -> EngineResult<Vec<(Rc<Join>, SinkEffect)>> {
        self.write(key.into(), None)
    }

    /// Read-modify-write a single key: `f` sees the current value (`None` if
    /// the key is absent) and chooses what should happen to it. Folding the
    /// read and the write into one call lets a caller implement compare-and-
    /// swap-style logic (append to a list, bump a counter) without a window
    /// where a concurrent cascade could observe the key between the two.
    pub fn modify(
        &mut self,
        key: impl Into<Bytes>,
        f: impl FnOnce(Option<&Bytes>) -> ModifyOutcome,
    ) -> EngineResult<Vec<(Rc<Join>, SinkEffect)>> {
        let key = key.into();
        let outcome = f(self.get(key.as_bytes()));
        match outcome {
            ModifyOutcome::Set(value) => self.write(key, Some(value)),
            ModifyOutcome::Erase => self.write(key, None),
            ModifyOutcome::Unchanged => Ok(Vec::new()),
        }
    }

    /// Mark `[lo, hi)` as fully materialized, merging with any adjacent or
    /// overlapping interval already recorded.
    pub fn mark_valid(&mut self, lo: Bytes, hi: Bytes) {
        if lo >= hi {
            return;
        }
        let mut merged_lo = lo;
        let mut merged_hi = hi;
        let mut kept = Vec::with_capacity(self.validity.len() + 1);
        for (l, h) in self.validity.drain(..) {
            if h < merged_lo || l > merged_hi {
                kept.push((l, h));
            } else {
                if l < merged_lo {
                    merged_lo = l;
                }
                if h > merged_hi {
                    merged_hi = h;
                }
            }
        }
        kept.push((merged_lo, merged_hi));
        kept.sort();
        self.validity = kept;
    }

    /// Whether `[lo, hi)` is already covered by a recorded valid interval.
    pub fn is_valid(&self, lo: &[u8], hi: &[u8]) -> bool {
        self.validity
            .iter()
            .any(|(l, h)| l.as_bytes() <= lo && hi <= h.as_bytes())
    }
}

/// Helper extension so `Table::get` can look up by `&[u8]` against a
/// `BTreeMap<Bytes, Datum>` without allocating a `Bytes` just to probe.
trait BTreeMapKeyLookup {
    fn get_key(&self, key: &[u8]) -> Option<&Datum>;
}

impl BTreeMapKeyLookup for BTreeMap<Bytes, Datum> {
    fn get_key(&self, key: &[u8]) -> Option<&Datum> {
        self.get(&Bytes::copy_from(key))
    }
}
