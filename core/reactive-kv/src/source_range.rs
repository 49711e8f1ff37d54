//! Materialized source ranges (§4.E): one installed subscription over a
//! half-open byte range `[ibegin, iend)` of a back source table, feeding
//! either a direct copy or a running aggregate into a single sink key.
//!
//! The aggregation kind is a tagged variant on [`Accumulator`] rather than a
//! trait object — five fixed kinds, dispatched once per notification, reads
//! better as a `match` than as a vtable (see the design note in
//! `join::Aggregation`).

use crate::bytestring::Bytes;
use crate::error::{invariant_violation, EngineError, EngineResult};
use crate::join::{Aggregation, Join};
use crate::pattern::Match;
use crate::table::Modification;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::rc::Rc;

type Bound = SmallVec<[u8; 56]>;

/// What a [`SourceRange::notify`] call means for the sink table: nothing
/// changed, a key should be set to a value, or a key should be erased
/// (an aggregate with no remaining contributing rows has nothing to report).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEffect {
    NoChange,
    Set(Bytes, Bytes),
    Erase(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MinMaxKind {
    Min,
    Max,
}

/// Per-variant running state. `Copy` carries none; the aggregates each carry
/// just enough to answer "what's the current aggregate value" in `O(log n)`
/// without rescanning the source table.
#[derive(Debug, Clone)]
enum Accumulator {
    Copy,
    Count { total: i64 },
    Sum { total: i64 },
    MinMax {
        kind: MinMaxKind,
        // Value -> number of currently-present source rows holding it.
        // A multiset rather than a single tracked extremum so erasing a
        // non-extreme value is O(log n) and erasing the extremum falls out
        // of the same code path instead of needing a full rescan.
        multiset: BTreeMap<Bytes, u64>,
    },
}

impl Accumulator {
    fn for_aggregation(agg: Aggregation) -> Self {
        match agg {
            Aggregation::Copy => Accumulator::Copy,
            Aggregation::Count => Accumulator::Count { total: 0 },
            Aggregation::Sum => Accumulator::Sum { total: 0 },
            Aggregation::Min => Accumulator::MinMax {
                kind: MinMaxKind::Min,
                multiset: BTreeMap::new(),
            },
            Aggregation::Max => Accumulator::MinMax {
                kind: MinMaxKind::Max,
                multiset: BTreeMap::new(),
            },
        }
    }
}

/// One installed range: a join, the slot bindings fixed by the probe
/// sources ahead of the back source, the byte interval this instance
/// subscribes to, and the aggregate (or copy) state it maintains.
pub struct SourceRange {
    id: u64,
    join: Rc<Join>,
    match_: Match,
    ibegin: Bound,
    iend: Bound,
    resultkeys: Vec<Bytes>,
    accumulator: Accumulator,
}

impl SourceRange {
    pub fn new(
        id: u64,
        join: Rc<Join>,
        match_: Match,
        ibegin: Bound,
        iend: Bound,
        resultkeys: Vec<Bytes>,
    ) -> Self {
        let accumulator = Accumulator::for_aggregation(join.aggregation);
        SourceRange {
            id,
            join,
            match_,
            ibegin,
            iend,
            resultkeys,
            accumulator,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn join(&self) -> &Rc<Join> {
        &self.join
    }

    pub fn ibegin(&self) -> &[u8] {
        &self.ibegin
    }

    pub fn iend(&self) -> &[u8] {
        &self.iend
    }

    pub fn resultkeys(&self) -> &[Bytes] {
        &self.resultkeys
    }

    fn in_bounds(&self, value: &Bytes) -> EngineResult<bool> {
        match &self.join.bounds {
            None => Ok(true),
            Some(b) => {
                let v = self.parse(value)?;
                Ok(b.contains(v))
            }
        }
    }

    fn parse(&self, value: &Bytes) -> EngineResult<i64> {
        value.parse_i64().ok_or_else(|| EngineError::NotAnInteger {
            key: format!("{}", self.join.name),
            value: value.to_string(),
        })
    }

    /// Apply one modification observed at `source_key` in the back source
    /// table, returning the effect it has on the sink.
    pub fn notify(&mut self, source_key: &Bytes, modification: Modification) -> EngineResult<SinkEffect> {
        match &mut self.accumulator {
            Accumulator::Copy => self.notify_copy(source_key, modification),
            Accumulator::Count { .. } => self.notify_count(source_key, modification),
            Accumulator::Sum { .. } => self.notify_sum(source_key, modification),
            Accumulator::MinMax { .. } => self.notify_min_max(source_key, modification),
        }
    }

    /// A copy join mirrors each in-bounds source row straight to its sink
    /// key (`pqsource.cc`'s `CopySourceRange::notify` calls `check_bounds`
    /// before copying, same as the aggregating variants below). A row that
    /// is, was, or becomes out of bounds is treated as absent on that side
    /// of the transition.
    fn notify_copy(&mut self, source_key: &Bytes, modification: Modification) -> EngineResult<SinkEffect> {
        match modification {
            Modification::Unchanged => Ok(SinkEffect::NoChange),
            Modification::Insert(new) => {
                if !self.in_bounds(&new)? {
                    return Ok(SinkEffect::NoChange);
                }
                let sink_key = self.join.expand_sink(&self.match_, source_key.as_bytes())?;
                if !self.resultkeys.contains(&sink_key) {
                    self.resultkeys.push(sink_key.clone());
                }
                Ok(SinkEffect::Set(sink_key, new))
            }
            Modification::Erase(old) => {
                if !self.in_bounds(&old)? {
                    return Ok(SinkEffect::NoChange);
                }
                let sink_key = self.join.expand_sink(&self.match_, source_key.as_bytes())?;
                self.resultkeys.retain(|k| k != &sink_key);
                Ok(SinkEffect::Erase(sink_key))
            }
            Modification::Update { old, new } => {
                let was = self.in_bounds(&old)?;
                let now = self.in_bounds(&new)?;
                let sink_key = self.join.expand_sink(&self.match_, source_key.as_bytes())?;
                match (was, now) {
                    (true, true) => Ok(SinkEffect::Set(sink_key, new)),
                    (true, false) => {
                        self.resultkeys.retain(|k| k != &sink_key);
                        Ok(SinkEffect::Erase(sink_key))
                    }
                    (false, true) => {
                        if !self.resultkeys.contains(&sink_key) {
                            self.resultkeys.push(sink_key.clone());
                        }
                        Ok(SinkEffect::Set(sink_key, new))
                    }
                    (false, false) => Ok(SinkEffect::NoChange),
                }
            }
        }
    }

    /// The sink key for this range: the probe-source bindings already fixed
    /// in `match_`, plus whatever slots the back source's own key
    /// contributes (for a single-source aggregation, this is typically the
    /// entire grouping key).
    fn sink_key_for(&self, source_key: &Bytes) -> EngineResult<Bytes> {
        let extracted = self
            .join
            .back_source()
            .pattern
            .try_match(source_key.as_bytes())
            .ok_or_else(|| EngineError::InvalidJoin {
                message: format!(
                    "key does not match back source pattern of join '{}'",
                    self.join.name
                ),
            })?;
        let mut m = self.match_.clone();
        for slot in self.join.back_source().pattern.slot_names() {
            if let Some(v) = extracted.get(slot) {
                m.bind(slot.to_string(), v.clone());
            }
        }
        self.join.sink().pattern.expand(&m)
    }

    fn notify_count(&mut self, source_key: &Bytes, modification: Modification) -> EngineResult<SinkEffect> {
        let total = match &mut self.accumulator {
            Accumulator::Count { total } => total,
            _ => unreachable!(),
        };
        match modification {
            Modification::Unchanged => return Ok(SinkEffect::NoChange),
            Modification::Insert(new) => {
                if self.in_bounds(&new)? {
                    *total += 1;
                }
            }
            Modification::Erase(old) => {
                if self.in_bounds(&old)? {
                    *total -= 1;
                }
            }
            Modification::Update { old, new } => {
                let was = self.in_bounds(&old)?;
                let now = self.in_bounds(&new)?;
                if was && !now {
                    *total -= 1;
                } else if !was && now {
                    *total += 1;
                }
            }
        }
        let total = match &self.accumulator {
            Accumulator::Count { total } => *total,
            _ => unreachable!(),
        };
        let sink_key = self.sink_key_for(source_key)?;
        if self.resultkeys.is_empty() {
            self.resultkeys.push(sink_key.clone());
        }
        Ok(SinkEffect::Set(sink_key, Bytes::from_i64(total)))
    }

    fn notify_sum(&mut self, source_key: &Bytes, modification: Modification) -> EngineResult<SinkEffect> {
        let delta = match modification {
            Modification::Unchanged => return Ok(SinkEffect::NoChange),
            Modification::Insert(new) => {
                if self.in_bounds(&new)? {
                    self.parse(&new)?
                } else {
                    0
                }
            }
            Modification::Erase(old) => {
                if self.in_bounds(&old)? {
                    -self.parse(&old)?
                } else {
                    0
                }
            }
            Modification::Update { old, new } => {
                let mut d = 0;
                if self.in_bounds(&old)? {
                    d -= self.parse(&old)?;
                }
                if self.in_bounds(&new)? {
                    d += self.parse(&new)?;
                }
                d
            }
        };
        match &mut self.accumulator {
            Accumulator::Sum { total } => *total += delta,
            _ => unreachable!(),
        }
        let total = match &self.accumulator {
            Accumulator::Sum { total } => *total,
            _ => unreachable!(),
        };
        let sink_key = self.sink_key_for(source_key)?;
        if self.resultkeys.is_empty() {
            self.resultkeys.push(sink_key.clone());
        }
        Ok(SinkEffect::Set(sink_key, Bytes::from_i64(total)))
    }

    fn notify_min_max(&mut self, source_key: &Bytes, modification: Modification) -> EngineResult<SinkEffect> {
        match modification {
            Modification::Unchanged => return Ok(SinkEffect::NoChange),
            Modification::Insert(new) => {
                if self.in_bounds(&new)? {
                    self.insert_value(&new);
                }
            }
            Modification::Erase(old) => {
                if self.in_bounds(&old)? {
                    self.remove_value(&old);
                }
            }
            Modification::Update { old, new } => {
                if self.in_bounds(&old)? {
                    self.remove_value(&old);
                }
                if self.in_bounds(&new)? {
                    self.insert_value(&new);
                }
            }
        }
        let sink_key = self.sink_key_for(source_key)?;
        match self.current_extreme() {
            Some(v) => {
                if self.resultkeys.is_empty() {
                    self.resultkeys.push(sink_key.clone());
                }
                Ok(SinkEffect::Set(sink_key, v))
            }
            None => {
                self.resultkeys.clear();
                Ok(SinkEffect::Erase(sink_key))
            }
        }
    }

    fn insert_value(&mut self, v: &Bytes) {
        if let Accumulator::MinMax { multiset, .. } = &mut self.accumulator {
            *multiset.entry(v.clone()).or_insert(0) += 1;
        }
    }

    /// Removes one occurrence of `v`. Erasing a value this range never
    /// recorded as present means the caller's bookkeeping (table-side
    /// insert/erase pairing) is broken — that is a bug upstream, not a
    /// recoverable condition here, so it panics rather than silently
    /// leaving the aggregate wrong.
    fn remove_value(&mut self, v: &Bytes) {
        if let Accumulator::MinMax { multiset, .. } = &mut self.accumulator {
            match multiset.get_mut(v) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    multiset.remove(v);
                }
                None => invariant_violation(
                    &self.join.name,
                    &v.to_string(),
                    "erased a value this source range never recorded as present",
                ),
            }
        }
    }

    fn current_extreme(&self) -> Option<Bytes> {
        match &self.accumulator {
            Accumulator::MinMax { kind, multiset } => match kind {
                MinMaxKind::Min => multiset.keys().next().cloned(),
                MinMaxKind::Max => multiset.keys().next_back().cloned(),
            },
            _ => None,
        }
    }
}
