//! Tunables for the reactive view engine.
//!
//! Replaces the scattered magic constants a teacher crate like this would
//! usually grow (MVCC prefix bytes, flush thresholds, ...) with one typed,
//! documented struct, because this engine has no MVCC wire format to keep in
//! sync across files.

/// Server-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Inline buffer size, in bytes, for owned byte strings (`Bytes`) before
    /// they spill to the heap. See §4.A.
    pub bytestring_inline_bytes: usize,

    /// Inline buffer size, in bytes, for a `SourceRange`'s `ibegin`/`iend`
    /// bounds before they spill to the heap. See §4.E.
    pub source_range_inline_bytes: usize,

    /// Queue depth below which `Server::pace` considers the core drained.
    /// This core never actually queues work (§5), so `pace` always returns
    /// immediately; the threshold exists so a future async collaborator has
    /// a stable knob to configure without an engine API change.
    pub pace_queue_threshold: usize,
}

impl ServerConfig {
    /// 32-byte inline byte strings, 56-byte inline source-range bounds,
    /// matching the sizes named throughout §3/§4 of the design.
    pub const fn new() -> Self {
        Self {
            bytestring_inline_bytes: 32,
            source_range_inline_bytes: 56,
            pace_queue_threshold: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
