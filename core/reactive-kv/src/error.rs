//! Error types for the reactive view engine.
//!
//! Structural/validation failures return `EngineResult<T>`; the one semantic
//! invariant violation that would otherwise let a sink silently diverge
//! (`AggregationInvariantViolation`) panics instead, per §7 of the design.

use thiserror::Error;

/// Unified error type for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `add_join` was given a spec that fails structural validation:
    /// unparseable pattern text, a sink slot with no source, a slot width
    /// mismatch, or a back source that is transitively a sink of the same
    /// join.
    #[error("invalid join: {message}")]
    InvalidJoin { message: String },

    /// A join spec referenced a slot name that is never bound by any source
    /// pattern.
    #[error("join '{join}' sink references undefined slot '{slot}'")]
    UndefinedSlot { join: String, slot: String },

    /// Two occurrences of the same slot name disagree on byte width.
    #[error("join '{join}' slot '{slot}' has conflicting widths: {a} vs {b}")]
    SlotWidthMismatch {
        join: String,
        slot: String,
        a: usize,
        b: usize,
    },

    /// The back source of a join is transitively a sink of the same join.
    #[error("join '{join}' is circular: back source '{table}' is already a sink of this join")]
    CircularJoin { join: String, table: String },

    /// A heap allocation for source-range key bytes failed.
    #[error("resource exhausted while storing key bytes for source range on '{table}'")]
    ResourceExhausted { table: String },

    /// A value stored in a `count`/`sum` source could not be parsed as a
    /// signed 64-bit decimal integer.
    #[error("value '{value}' at key '{key}' is not a valid integer")]
    NotAnInteger { key: String, value: String },

    /// `stats()`/`control()` JSON construction failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for all engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Aborts the process with a diagnostic message identifying the join and key
/// involved. Used exclusively by the Min/Max source-range variants when they
/// detect an erase of the current extremum outside an accumulator pass (see
/// `source_range::min_max`) — a condition that is a bug in the calling code,
/// not a recoverable runtime error, because the sink's value would otherwise
/// silently diverge from the source data.
#[track_caller]
pub(crate) fn invariant_violation(join: &str, key: &str, detail: &str) -> ! {
    panic!("aggregation invariant violated in join '{join}' at key '{key}': {detail}");
}
