//! Materialization controller (§4.G): owns the table registry and the join
//! graph, wires new joins to their back source, backfills them against
//! existing data, and routes cascaded sink effects from one write through
//! however many downstream joins it touches.
//!
//! Single-threaded: a write to one table can synchronously cascade through
//! an arbitrary chain of joins before `write` returns, same as the rest of
//! this engine (§5).

use crate::bytestring::Bytes;
use crate::error::{EngineError, EngineResult};
use crate::join::Join;
use crate::pattern::Match;
use crate::source_range::{SinkEffect, SourceRange};
use crate::table::{Notifier, Table};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// The table registry plus the set of installed joins.
pub struct Materializer {
    tables: HashMap<String, Rc<RefCell<Table>>>,
    joins: HashMap<String, Rc<Join>>,
    next_range_id: u64,
    /// Bytes moved to the heap by a `SourceRange`'s `ibegin`/`iend` bound
    /// storage (§3 Invariant 5, §4.E). Never decremented: a diagnostic
    /// counter of total heap key-bytes ever allocated, not bytes currently
    /// live.
    allocated_key_bytes: Cell<i64>,
}

impl Materializer {
    pub fn new() -> Self {
        Materializer {
            tables: HashMap::new(),
            joins: HashMap::new(),
            next_range_id: 0,
            allocated_key_bytes: Cell::new(0),
        }
    }

    pub fn allocated_key_bytes(&self) -> i64 {
        self.allocated_key_bytes.get()
    }

    pub fn create_table(&mut self, name: impl Into<String>) -> Rc<RefCell<Table>> {
        let name = name.into();
        self.tables
            .entry(name.clone())
            .or_insert_with(|| Rc::new(RefCell::new(Table::new(name))))
            .clone()
    }

    pub fn table(&self, name: &str) -> Option<Rc<RefCell<Table>>> {
        self.tables.get(name).cloned()
    }

    /// Register and materialize a join: validates the join graph stays
    /// acyclic, installs a source range over the back source, and backfills
    /// it against whatever rows already exist there.
    ///
    /// Only single-source joins are auto-materialized; a join with probe
    /// sources ahead of its back source needs those probe bindings supplied
    /// externally (there is no combinatorial enumeration of probe values
    /// here — see the design note on this limitation).
    pub fn add_join(&mut self, join: Join) -> EngineResult<()> {
        if join.sources().len() != 1 {
            return Err(EngineError::InvalidJoin {
                message: format!(
                    "join '{}' has {} source patterns; only single-source joins are \
                     auto-materialized by add_join",
                    join.name,
                    join.sources().len()
                ),
            });
        }

        let back_table_name = join.back_source().table.clone();
        let sink_table_name = join.sink().table.clone();

        if !self.tables.contains_key(&back_table_name) {
            return Err(EngineError::InvalidJoin {
                message: format!("join '{}' back source table '{back_table_name}' is not registered", join.name),
            });
        }
        if !self.tables.contains_key(&sink_table_name) {
            return Err(EngineError::InvalidJoin {
                message: format!("join '{}' sink table '{sink_table_name}' is not registered", join.name),
            });
        }

        self.check_acyclic(&join)?;

        let join = Rc::new(join);
        let (ibegin, iend) = join.back_source().pattern.range_for(&Match::new());
        let range_id = self.next_range_id;
        self.next_range_id += 1;

        // Each SourceRange copies its bounds into a 56-byte inline buffer
        // (§4.E); a bound wider than that spills to the heap, and that's the
        // one call site that bumps `allocated_key_bytes` (§3 Invariant 5).
        let ibegin_sv: SmallVec<[u8; 56]> = SmallVec::from_slice(ibegin.as_bytes());
        let iend_sv: SmallVec<[u8; 56]> = SmallVec::from_slice(iend.as_bytes());
        if ibegin_sv.spilled() {
            self.allocated_key_bytes
                .set(self.allocated_key_bytes.get() + ibegin_sv.len() as i64);
        }
        if iend_sv.spilled() {
            self.allocated_key_bytes
                .set(self.allocated_key_bytes.get() + iend_sv.len() as i64);
        }

        let source_range = Rc::new(RefCell::new(SourceRange::new(
            range_id,
            Rc::clone(&join),
            Match::new(),
            ibegin_sv,
            iend_sv,
            Vec::new(),
        )));

        let back_table = self.tables.get(&back_table_name).unwrap().clone();
        back_table
            .borrow_mut()
            .register(Notifier::SourceRange(Rc::clone(&source_range)));

        let backfill: Vec<(Bytes, Bytes)> = back_table
            .borrow()
            .scan(ibegin.as_bytes(), iend.as_bytes())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut effects = Vec::new();
        for (key, value) in backfill {
            let effect = source_range
                .borrow_mut()
                .notify(&key, crate::table::Modification::Insert(value))?;
            effects.push((Rc::clone(&join), effect));
        }
        back_table.borrow_mut().mark_valid(ibegin, iend);

        self.joins.insert(join.name.clone(), Rc::clone(&join));
        self.apply_effects(effects)
    }

    fn check_acyclic(&self, new_join: &Join) -> EngineResult<()> {
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for j in self.joins.values() {
            edges
                .entry(j.back_source().table.as_str())
                .or_default()
                .push(j.sink().table.as_str());
        }
        edges
            .entry(new_join.back_source().table.as_str())
            .or_default()
            .push(new_join.sink().table.as_str());

        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        for start in edges.keys().copied().collect::<Vec<_>>() {
            if !visited.contains(start) && self.has_cycle(start, &edges, &mut visiting, &mut visited) {
                return Err(EngineError::CircularJoin {
                    join: new_join.name.clone(),
                    table: start.to_string(),
                });
            }
        }
        Ok(())
    }

    fn has_cycle<'a>(
        &self,
        node: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> bool {
        if visiting.contains(node) {
            return true;
        }
        if visited.contains(node) {
            return false;
        }
        visiting.insert(node);
        if let Some(next) = edges.get(node) {
            for &n in next {
                if self.has_cycle(n, edges, visiting, visited) {
                    return true;
                }
            }
        }
        visiting.remove(node);
        visited.insert(node);
        false
    }

    /// Write `value` (or erase, if `None`) at `key` in `table`, cascading
    /// through however many joins are subscribed, directly or transitively.
    ///
    /// An unregistered table name is auto-vivified (§7 kind 2: `insert`/
    /// `erase` never fail on a missing table, they create it on demand)
    /// rather than treated as an error.
    pub fn write(
        &mut self,
        table: &str,
        key: impl Into<Bytes>,
        value: Option<Bytes>,
    ) -> EngineResult<()> {
        let t = self.create_table(table);
        let effects = t.borrow_mut().write(key.into(), value)?;
        self.apply_effects(effects)
    }

    /// All rows in `table` with key in `[lo, hi)`, in key order. An
    /// unregistered table name reads as empty (§7.2 kind 2).
    pub fn scan(&self, table: &str, lo: &[u8], hi: &[u8]) -> Vec<(Bytes, Bytes)> {
        match self.tables.get(table) {
            Some(t) => t.borrow().scan(lo, hi).map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => Vec::new(),
        }
    }

    /// Number of rows in `table` with key in `[lo, hi)`.
    pub fn count(&self, table: &str, lo: &[u8], hi: &[u8]) -> usize {
        match self.tables.get(table) {
            Some(t) => t.borrow().scan(lo, hi).count(),
            None => 0,
        }
    }

    fn apply_effects(&mut self, effects: Vec<(Rc<Join>, SinkEffect)>) -> EngineResult<()> {
        for (join, effect) in effects {
            let sink_table = match self.tables.get(&join.sink().table) {
                Some(t) => t.clone(),
                None => continue,
            };
            let next = match effect {
                SinkEffect::NoChange => continue,
                SinkEffect::Set(k, v) => sink_table.borrow_mut().write(k, Some(v))?,
                SinkEffect::Erase(k) => sink_table.borrow_mut().write(k, None)?,
            };
            self.apply_effects(next)?;
        }
        Ok(())
    }
}

impl Default for Materializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::Aggregation;
    use crate::pattern::Pattern;

    #[test]
    fn copy_join_backfills_existing_rows() {
        let mut m = Materializer::new();
        let posts = m.create_table("posts");
        m.create_table("timeline");
        posts
            .borrow_mut()
            .insert("posts|alice|1|", "hello")
            .unwrap();

        m.add_join(
            Join::new(
                "timeline".into(),
                vec![Pattern::parse("posts|U:5|ID:1|").unwrap()],
                Pattern::parse("timeline|U:5|ID:1|").unwrap(),
                Aggregation::Copy,
                None,
            )
            .unwrap(),
        )
        .unwrap();

        let timeline = m.table("timeline").unwrap();
        assert_eq!(
            timeline.borrow().get(b"timeline|alice|1|").unwrap().as_bytes(),
            b"hello"
        );
    }

    #[test]
    fn later_write_cascades_into_sink() {
        let mut m = Materializer::new();
        m.create_table("posts");
        m.create_table("timeline");
        m.add_join(
            Join::new(
                "timeline".into(),
                vec![Pattern::parse("posts|U:5|ID:1|").unwrap()],
                Pattern::parse("timeline|U:5|ID:1|").unwrap(),
                Aggregation::Copy,
                None,
            )
            .unwrap(),
        )
        .unwrap();

        m.write("posts", Bytes::from("posts|alice|1|"), Some(Bytes::from("hi")))
            .unwrap();

        let timeline = m.table("timeline").unwrap();
        assert_eq!(
            timeline.borrow().get(b"timeline|alice|1|").unwrap().as_bytes(),
            b"hi"
        );
    }

    #[test]
    fn count_join_tracks_group_size() {
        let mut m = Materializer::new();
        m.create_table("events");
        m.create_table("counts");
        m.add_join(
            Join::new(
                "cnt".into(),
                vec![Pattern::parse("events|T:1|U:1|").unwrap()],
                Pattern::parse("counts|T:1|").unwrap(),
                Aggregation::Count,
                None,
            )
            .unwrap(),
        )
        .unwrap();

        m.write("events", Bytes::from("events|1|a|"), Some(Bytes::from("x")))
            .unwrap();
        m.write("events", Bytes::from("events|1|b|"), Some(Bytes::from("x")))
            .unwrap();

        let counts = m.table("counts").unwrap();
        assert_eq!(
            counts.borrow().get(b"counts|1|").unwrap().as_bytes(),
            b"2"
        );
    }

    #[test]
    fn direct_self_loop_join_is_rejected_at_join_construction() {
        let err = Join::new(
            "bad".into(),
            vec![Pattern::parse("t|U:1|").unwrap()],
            Pattern::parse("t|U:1|").unwrap(),
            Aggregation::Copy,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::CircularJoin { .. }));
    }

    #[test]
    fn transitive_cycle_across_two_joins_is_rejected() {
        let mut m = Materializer::new();
        m.create_table("a");
        m.create_table("b");
        m.add_join(
            Join::new(
                "a_to_b".into(),
                vec![Pattern::parse("a|U:1|").unwrap()],
                Pattern::parse("b|U:1|").unwrap(),
                Aggregation::Copy,
                None,
            )
            .unwrap(),
        )
        .unwrap();

        let err = m
            .add_join(
                Join::new(
                    "b_to_a".into(),
                    vec![Pattern::parse("b|U:1|").unwrap()],
                    Pattern::parse("a|U:1|").unwrap(),
                    Aggregation::Copy,
                    None,
                )
                .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::CircularJoin { .. }));
    }

    #[test]
    fn add_join_rejects_unregistered_tables() {
        let mut m = Materializer::new();
        let err = m
            .add_join(
                Join::new(
                    "x".into(),
                    vec![Pattern::parse("a|U:1|").unwrap()],
                    Pattern::parse("b|U:1|").unwrap(),
                    Aggregation::Copy,
                    None,
                )
                .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidJoin { .. }));
    }

    #[test]
    fn write_auto_vivifies_unregistered_table() {
        let mut m = Materializer::new();
        assert!(m.table("ghost").is_none());
        m.write("ghost", Bytes::from("k"), Some(Bytes::from("v"))).unwrap();
        let t = m.table("ghost").unwrap();
        assert_eq!(t.borrow().get(b"k").unwrap().as_bytes(), b"v");
    }

    #[test]
    fn write_erase_auto_vivifies_unregistered_table_as_a_no_op() {
        let mut m = Materializer::new();
        m.write("ghost", Bytes::from("k"), None).unwrap();
        let t = m.table("ghost").unwrap();
        assert!(t.borrow().get(b"k").is_none());
    }

    #[test]
    fn allocated_key_bytes_unaffected_by_narrow_bounds() {
        let mut m = Materializer::new();
        m.create_table("events");
        m.create_table("counts");
        m.add_join(
            Join::new(
                "cnt".into(),
                vec![Pattern::parse("events|T:1|U:1|").unwrap()],
                Pattern::parse("counts|T:1|").unwrap(),
                Aggregation::Count,
                None,
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(m.allocated_key_bytes(), 0);
    }

    #[test]
    fn scan_and_count_on_unregistered_table_are_empty() {
        let m = Materializer::new();
        assert!(m.scan("ghost", b"\x00", b"\xff").is_empty());
        assert_eq!(m.count("ghost", b"\x00", b"\xff"), 0);
    }

    #[test]
    fn scan_and_count_reflect_table_contents() {
        let mut m = Materializer::new();
        m.write("t", Bytes::from("a"), Some(Bytes::from("1"))).unwrap();
        m.write("t", Bytes::from("b"), Some(Bytes::from("2"))).unwrap();
        assert_eq!(m.count("t", b"\x00", b"\xff"), 2);
        let rows = m.scan("t", b"\x00", b"\xff");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0.as_bytes(), b"a");
    }

    #[test]
    fn allocated_key_bytes_tracks_source_range_bound_spill() {
        let mut m = Materializer::new();
        m.create_table("wide");
        m.create_table("narrow");
        // "wide|" (5) + a 60-byte slot + "|" (1) = 66 bytes: past the
        // 56-byte inline bound buffer, so both ibegin and iend spill.
        let pattern = Pattern::parse("wide|T:60|").unwrap();
        assert!(pattern.total_width() > 56);

        m.add_join(
            Join::new(
                "j".into(),
                vec![pattern.clone()],
                Pattern::parse("narrow|T:60|").unwrap(),
                Aggregation::Copy,
                None,
            )
            .unwrap(),
        )
        .unwrap();

        assert_eq!(m.allocated_key_bytes(), 2 * pattern.total_width() as i64);
    }
}
