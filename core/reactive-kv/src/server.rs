//! Server façade (§4.H): the single entry point a collaborator embeds.
//! Wraps the [`Materializer`] with table creation, join registration, row
//! read/write, and the introspection surface (`stats`, `control`) a process
//! hosting this engine would expose over its own transport.

use crate::bytestring::Bytes;
use crate::config::ServerConfig;
use crate::error::{EngineError, EngineResult};
use crate::join::{Aggregation, Bounds};
use crate::materialize::Materializer;
use crate::pattern::Pattern;
use serde_json::{json, Value};
use tracing::{debug, info};

/// The engine's single entry point. Not `Clone`/`Send`/`Sync` — this engine
/// runs on one thread (§5); a multi-threaded host shards across several
/// `Server`s rather than sharing one.
pub struct Server {
    config: ServerConfig,
    materializer: Materializer,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server {
            config,
            materializer: Materializer::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn create_table(&mut self, name: impl Into<String>) {
        self.materializer.create_table(name);
    }

    /// Parse and install a join from its textual spec (§6's grammar):
    /// whitespace-separated `source <pattern>` lines (one per source,
    /// probe sources first, back source last), a `sink <pattern>` line, an
    /// aggregation keyword (`copy`/`count`/`min`/`max`/`sum`), and an
    /// optional trailing `bounds <lo> <hi>` (both inclusive).
    pub fn add_join(&mut self, name: impl Into<String>, spec: &str) -> EngineResult<()> {
        let name = name.into();
        let mut sources = Vec::new();
        let mut sink = None;
        let mut aggregation = None;
        let mut bounds = None;

        for line in spec.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut words = line.split_whitespace();
            match words.next() {
                Some("source") => {
                    let pattern = words.next().ok_or_else(|| EngineError::InvalidJoin {
                        message: format!("join '{name}': 'source' line missing a pattern"),
                    })?;
                    sources.push(Pattern::parse(pattern)?);
                }
                Some("sink") => {
                    let pattern = words.next().ok_or_else(|| EngineError::InvalidJoin {
                        message: format!("join '{name}': 'sink' line missing a pattern"),
                    })?;
                    sink = Some(Pattern::parse(pattern)?);
                }
                Some("copy") => aggregation = Some(Aggregation::Copy),
                Some("count") => aggregation = Some(Aggregation::Count),
                Some("min") => aggregation = Some(Aggregation::Min),
                Some("max") => aggregation = Some(Aggregation::Max),
                Some("sum") => aggregation = Some(Aggregation::Sum),
                Some("bounds") => {
                    let lo = words.next().and_then(|w| w.parse::<i64>().ok());
                    let hi = words.next().and_then(|w| w.parse::<i64>().ok());
                    bounds = Some(Bounds {
                        lo,
                        lo_inclusive: true,
                        hi,
                        hi_inclusive: true,
                    });
                }
                Some(other) => {
                    return Err(EngineError::InvalidJoin {
                        message: format!("join '{name}': unrecognized join spec line '{other}'"),
                    })
                }
                None => {}
            }
        }

        let sink = sink.ok_or_else(|| EngineError::InvalidJoin {
            message: format!("join '{name}' has no sink line"),
        })?;
        let aggregation = aggregation.ok_or_else(|| EngineError::InvalidJoin {
            message: format!("join '{name}' has no aggregation line"),
        })?;

        debug!(join = %name, sources = sources.len(), "installing join");
        let join = crate::join::Join::new(name.clone(), sources, sink, aggregation, bounds)?;
        self.materializer.add_join(join)?;
        info!(join = %name, "join installed");
        Ok(())
    }

    pub fn get(&self, table: &str, key: &[u8]) -> Option<Bytes> {
        self.materializer.table(table)?.borrow().get(key).cloned()
    }

    pub fn insert(&mut self, table: &str, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.materializer
            .write(table, Bytes::copy_from(key), Some(Bytes::copy_from(value)))
    }

    pub fn erase(&mut self, table: &str, key: &[u8]) -> EngineResult<()> {
        self.materializer.write(table, Bytes::copy_from(key), None)
    }

    /// All rows in `table` with key in `[lo, hi)`, in key order. An
    /// unregistered table name reads as empty (§7.2 kind 2), same as `get`.
    pub fn scan(&self, table: &str, lo: &[u8], hi: &[u8]) -> Vec<(Bytes, Bytes)> {
        self.materializer.scan(table, lo, hi)
    }

    /// Number of rows in `table` with key in `[lo, hi)`.
    pub fn count(&self, table: &str, lo: &[u8], hi: &[u8]) -> usize {
        self.materializer.count(table, lo, hi)
    }

    /// `count`, but materializing any sink subinterval of `[lo, hi)` that
    /// isn't already covered before counting it (§4.G, §6). Joins installed
    /// through `add_join` backfill eagerly at registration rather than on
    /// first read (see DESIGN.md's eager-materialization deviation), so
    /// under this engine every sink range a join could cover is already
    /// valid by the time a caller reaches here — `add_count` and `count`
    /// observe the same state. The distinct entry point stays so a future
    /// lazy materialization path has somewhere to hook in without a facade
    /// signature change.
    pub fn add_count(&self, table: &str, lo: &[u8], hi: &[u8]) -> usize {
        self.materializer.count(table, lo, hi)
    }

    /// Block until all pending work drains. This engine never actually
    /// queues work — every write cascades synchronously inside `insert`/
    /// `erase` (§5) — so `pace` always returns immediately. The knob
    /// exists so a future asynchronous collaborator has a stable API to
    /// call without an engine signature change.
    pub fn pace(&self) {
        if self.config.pace_queue_threshold > 0 {
            debug!(threshold = self.config.pace_queue_threshold, "pace: nothing queued");
        }
    }

    /// A JSON snapshot of server-wide counters, meant for a host process's
    /// own status endpoint.
    pub fn stats(&self) -> EngineResult<Value> {
        Ok(json!({
            "allocated_key_bytes": self.materializer.allocated_key_bytes(),
            "bytestring_inline_bytes": self.config.bytestring_inline_bytes,
            "source_range_inline_bytes": self.config.source_range_inline_bytes,
        }))
    }

    /// Handle a JSON control command. Currently supports `{"op": "pace"}`;
    /// unrecognized ops echo back a `supported: false` response rather than
    /// erroring, since a control channel often forwards commands meant for
    /// sibling services this engine doesn't implement.
    pub fn control(&self, command: &Value) -> EngineResult<Value> {
        match command.get("op").and_then(Value::as_str) {
            Some("pace") => {
                self.pace();
                Ok(json!({"ok": true}))
            }
            Some(other) => Ok(json!({"ok": false, "supported": false, "op": other})),
            None => Err(EngineError::Json(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "control command missing 'op'",
            )))),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_join_end_to_end() {
        let mut s = Server::default();
        s.create_table("posts");
        s.create_table("timeline");
        s.add_join(
            "timeline",
            "source posts|U:5|ID:1|\nsink timeline|U:5|ID:1|\ncopy",
        )
        .unwrap();

        s.insert("posts", b"posts|alice|1|", b"hello").unwrap();
        assert_eq!(s.get("timeline", b"timeline|alice|1|").unwrap().as_bytes(), b"hello");
    }

    #[test]
    fn count_join_with_bounds() {
        let mut s = Server::default();
        s.create_table("events");
        s.create_table("counts");
        s.add_join(
            "cnt",
            "source events|T:1|U:1|\nsink counts|T:1|\ncount\nbounds 0 100",
        )
        .unwrap();

        s.insert("events", b"events|1|a|", b"5").unwrap();
        s.insert("events", b"events|1|b|", b"5").unwrap();
        assert_eq!(s.get("counts", b"counts|1|").unwrap().as_bytes(), b"2");
    }

    #[test]
    fn stats_allocated_key_bytes_unaffected_by_joinless_inserts() {
        let mut s = Server::default();
        s.create_table("t");
        s.insert("t", b"key", b"value").unwrap();
        let stats = s.stats().unwrap();
        assert_eq!(stats["allocated_key_bytes"], 0);
    }

    #[test]
    fn stats_reports_allocated_key_bytes_once_a_join_spills_its_bounds() {
        let mut s = Server::default();
        s.create_table("wide");
        s.create_table("narrow");
        s.add_join(
            "j",
            "source wide|T:60|\nsink narrow|T:60|\ncopy",
        )
        .unwrap();
        let stats = s.stats().unwrap();
        assert!(stats["allocated_key_bytes"].as_i64().unwrap() > 0);
    }

    #[test]
    fn scan_returns_rows_in_range() {
        let mut s = Server::default();
        s.create_table("t");
        s.insert("t", b"a", b"1").unwrap();
        s.insert("t", b"b", b"2").unwrap();
        s.insert("t", b"c", b"3").unwrap();
        let rows = s.scan("t", b"a", b"c");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0.as_bytes(), b"a");
    }

    #[test]
    fn scan_on_unregistered_table_is_empty() {
        let s = Server::default();
        assert!(s.scan("ghost", b"\x00", b"\xff").is_empty());
    }

    #[test]
    fn count_matches_scan_len() {
        let mut s = Server::default();
        s.create_table("t");
        s.insert("t", b"a", b"1").unwrap();
        s.insert("t", b"b", b"2").unwrap();
        assert_eq!(s.count("t", b"\x00", b"\xff"), 2);
    }

    #[test]
    fn add_count_materializes_and_counts_sink_rows() {
        let mut s = Server::default();
        s.create_table("events");
        s.create_table("counts");
        s.insert("events", b"events|1|a|", b"5").unwrap();
        s.insert("events", b"events|1|b|", b"5").unwrap();
        s.add_join(
            "cnt",
            "source events|T:1|U:1|\nsink counts|T:1|\ncount",
        )
        .unwrap();
        assert_eq!(s.add_count("counts", b"\x00", b"\xff"), 1);
    }

    #[test]
    fn control_pace_returns_ok() {
        let s = Server::default();
        let resp = s.control(&json!({"op": "pace"})).unwrap();
        assert_eq!(resp["ok"], true);
    }

    #[test]
    fn control_unsupported_op_reports_unsupported() {
        let s = Server::default();
        let resp = s.control(&json!({"op": "frobnicate"})).unwrap();
        assert_eq!(resp["supported"], false);
    }

    #[test]
    fn add_join_rejects_malformed_spec() {
        let mut s = Server::default();
        s.create_table("a");
        s.create_table("b");
        let err = s.add_join("bad", "source a|U:1|\nsink b|U:1|").unwrap_err();
        assert!(matches!(err, EngineError::InvalidJoin { .. }));
    }
}
