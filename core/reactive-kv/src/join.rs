//! Join definitions (§4.D): an ordered list of source patterns plus one
//! sink pattern, sharing a slot vocabulary, tagged with an aggregation
//! variant.

use crate::bytestring::Bytes;
use crate::error::{EngineError, EngineResult};
use crate::pattern::{Match, Pattern};
use std::collections::BTreeMap;

/// The aggregation a join maintains in its sink. Dispatched as a tagged
/// variant in `source_range`, not via open polymorphism — see the design
/// note on per-variant behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Copy,
    Count,
    Min,
    Max,
    Sum,
}

/// An inclusive/exclusive integer bounds predicate, evaluated against a
/// source value to decide whether an update is a logical transition into,
/// out of, or within the aggregated range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub lo: Option<i64>,
    pub lo_inclusive: bool,
    pub hi: Option<i64>,
    pub hi_inclusive: bool,
}

impl Bounds {
    pub fn contains(&self, value: i64) -> bool {
        let above_lo = match self.lo {
            None => true,
            Some(lo) => {
                if self.lo_inclusive {
                    value >= lo
                } else {
                    value > lo
                }
            }
        };
        let below_hi = match self.hi {
            None => true,
            Some(hi) => {
                if self.hi_inclusive {
                    value <= hi
                } else {
                    value < hi
                }
            }
        };
        above_lo && below_hi
    }
}

/// A table name paired with the pattern a join uses against it. The table
/// name is derived from the pattern's own leading literal run (see
/// `Pattern::table_name`), so a join spec only ever writes the pattern
/// itself, never a separate table field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePattern {
    pub table: String,
    pub pattern: Pattern,
}

/// A registered join: sources (probe first, back source last), one sink,
/// one aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub name: String,
    sources: Vec<TablePattern>,
    sink: TablePattern,
    pub aggregation: Aggregation,
    pub bounds: Option<Bounds>,
}

impl Join {
    /// Construct and validate a join. See §4.D for the three structural
    /// checks; transitive (multi-join) cycle detection is the
    /// materialization controller's job (§4.G), since it needs the full
    /// join graph, not just this one join's shape.
    pub fn new(
        name: String,
        sources: Vec<Pattern>,
        sink: Pattern,
        aggregation: Aggregation,
        bounds: Option<Bounds>,
    ) -> EngineResult<Join> {
        if sources.is_empty() {
            return Err(EngineError::InvalidJoin {
                message: format!("join '{name}' has no source patterns"),
            });
        }

        let to_table_pattern = |p: Pattern| -> EngineResult<TablePattern> {
            let table = p.table_name().ok_or_else(|| EngineError::InvalidJoin {
                message: format!(
                    "join '{name}' pattern has no derivable table name (must start with a literal)"
                ),
            })?;
            Ok(TablePattern { table, pattern: p })
        };

        let sources: Vec<TablePattern> = sources
            .into_iter()
            .map(to_table_pattern)
            .collect::<EngineResult<_>>()?;
        let sink = to_table_pattern(sink)?;

        let mut widths: BTreeMap<String, usize> = BTreeMap::new();
        for tp in sources.iter().chain(std::iter::once(&sink)) {
            for slot in tp.pattern.slot_names() {
                let w = tp.pattern.slot_width(slot).unwrap();
                if let Some(prev) = widths.insert(slot.to_string(), w) {
                    if prev != w {
                        return Err(EngineError::SlotWidthMismatch {
                            join: name.clone(),
                            slot: slot.to_string(),
                            a: prev,
                            b: w,
                        });
                    }
                }
            }
        }

        for slot in sink.pattern.slot_names() {
            if !sources.iter().any(|s| s.pattern.slot_width(slot).is_some()) {
                return Err(EngineError::UndefinedSlot {
                    join: name.clone(),
                    slot: slot.to_string(),
                });
            }
        }

        let back = sources.last().unwrap();
        if back.table == sink.table {
            return Err(EngineError::CircularJoin {
                join: name.clone(),
                table: sink.table.clone(),
            });
        }

        Ok(Join {
            name,
            sources,
            sink,
            aggregation,
            bounds,
        })
    }

    pub fn sources(&self) -> &[TablePattern] {
        &self.sources
    }

    pub fn back_source(&self) -> &TablePattern {
        self.sources.last().unwrap()
    }

    pub fn sink(&self) -> &TablePattern {
        &self.sink
    }

    /// Expand the sink key reachable from a back-source key, given the
    /// slot bindings already established by earlier sources (`base`).
    pub fn expand_sink(&self, base: &Match, back_source_key: &[u8]) -> EngineResult<Bytes> {
        let extracted = self
            .back_source()
            .pattern
            .try_match(back_source_key)
            .ok_or_else(|| EngineError::InvalidJoin {
                message: format!(
                    "key does not match back source pattern of join '{}'",
                    self.name
                ),
            })?;
        let mut m = base.clone();
        for slot in self.back_source().pattern.slot_names() {
            if let Some(v) = extracted.get(slot) {
                m.bind(slot.to_string(), v.clone());
            }
        }
        self.sink.pattern.expand(&m)
    }
}
