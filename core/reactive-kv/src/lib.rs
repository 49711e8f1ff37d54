//! # reactive-kv — in-memory range-partitioned key-value store with
//! incrementally maintained join views
//!
//! An embedded, single-threaded engine: an ordered [`table::Table`] holds
//! byte-string key/value rows; a [`join::Join`] declares how rows from one
//! table are copied or aggregated (count/min/max/sum) into another; the
//! [`materialize::Materializer`] keeps every installed join's sink
//! up to date as the source table changes, cascading through however many
//! joins a single write touches. [`server::Server`] is the façade a host
//! process embeds.
//!
//! ## Quick start
//!
//! ```rust
//! use reactive_kv::Server;
//!
//! # fn main() -> reactive_kv::EngineResult<()> {
//! let mut server = Server::default();
//! server.create_table("posts");
//! server.create_table("timeline");
//! server.add_join(
//!     "timeline",
//!     "source posts|U:5|ID:1|\nsink timeline|U:5|ID:1|\ncopy",
//! )?;
//!
//! server.insert("posts", b"posts|alice|1|", b"hello")?;
//! assert_eq!(server.get("timeline", b"timeline|alice|1|").unwrap().as_bytes(), b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module structure
//! - [`bytestring`] — small-buffer-optimized byte strings (§4.A)
//! - [`table`] — ordered key/value storage and notifier dispatch (§4.B)
//! - [`pattern`] — join key patterns, partial matches, range derivation (§4.C)
//! - [`join`] — join definitions and validation (§4.D)
//! - [`source_range`] — per-join materialized ranges and aggregation (§4.E)
//! - [`range_index`] — augmented interval tree over a table's notifiers (§4.F)
//! - [`materialize`] — the join graph and cascade driver (§4.G)
//! - [`server`] — the embeddable façade (§4.H)
//! - [`config`] — server tunables
//! - [`error`] — the unified error type
//! - [`logging`] — optional `tracing` initialization

pub mod bytestring;
pub mod config;
pub mod error;
pub mod join;
pub mod logging;
pub mod materialize;
pub mod pattern;
pub mod range_index;
pub mod server;
pub mod source_range;
pub mod table;

pub use bytestring::Bytes;
pub use config::ServerConfig;
pub use error::{EngineError, EngineResult};
pub use join::{Aggregation, Bounds, Join};
pub use materialize::Materializer;
pub use pattern::{Match, Pattern};
pub use server::Server;
pub use table::{Modification, ModifyOutcome, Table};
