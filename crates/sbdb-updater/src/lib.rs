//! sbdb-updater: incremental update-stream parsing
//!
//! An update response is a line-oriented control stream with binary chunk
//! payloads embedded after `a:`/`s:` headers. [`ProtocolParser`] consumes it
//! in arbitrarily sized pieces and accumulates one [`TableUpdate`] per table,
//! ready to hand to [`sbdb_core::Classifier::apply_updates`].
//!
//! ```text
//! n:1800
//! i:goog-phish-shavar
//! ad:1-3
//! a:4:4:5
//! <5 payload bytes>
//! ```
//!
//! [`TableUpdate`]: sbdb_core::TableUpdate

mod directive;
mod error;
mod parser;
mod payload;

pub use directive::{ChunkHeader, Directive};
pub use error::{ParseError, Result};
pub use parser::{ForwardedUpdate, ProtocolParser, MAX_CHUNK_SIZE};
pub use payload::{decode_chunk, ChunkSpec};
