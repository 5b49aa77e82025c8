//! sbdb-core: prefix tables and the classifier for URL reputation lookups
//!
//! Threat lists are stored per table as sets of 4-byte SHA-256 prefixes
//! (and the occasional 32-byte complete hash), each tagged with the chunk
//! number that delivered it. A URL is checked by hashing every host/path
//! fragment it expands to and probing every table.
//!
//! # Privacy model
//!
//! A prefix match is only a candidate. Confirming it means asking a remote
//! completion service for the full hashes behind the prefix, which tells
//! that service something about the URL being visited.
//!
//! | Information | Completion service learns |
//! |-------------|---------------------------|
//! | Full URL | NO - only 4-byte prefixes leave the client |
//! | Which prefix of a request is real | NO - padded with noise prefixes |
//! | That some listed prefix matched | YES |
//!
//! Noise prefixes are drawn from the same table and seeded by the real
//! prefix, so repeated lookups of one URL produce identical requests.

mod backend;
mod chunk;
mod classifier;
mod config;
mod error;
mod fragments;
mod hash;
mod result;
mod store;
mod table_update;

pub use backend::{validate_table_name, FileBackend, MemoryBackend, StoreBackend, STORE_EXTENSION};
pub use chunk::{ChunkRange, ChunkSet, ChunkType};
pub use classifier::Classifier;
pub use config::{split_tables, ClassifierConfig};
pub use error::Error;
pub use fragments::LookupKey;
pub use hash::{CompleteHash, Prefix};
pub use result::{CacheEntry, CacheResult, LookupResult};
pub use store::{ApplyStats, PrefixStore, STORE_MAGIC};
pub use table_update::{AddComplete, AddPrefix, SubComplete, SubPrefix, TableUpdate};

pub type Result<T> = std::result::Result<T, Error>;

/// Constants shared by the parser and the stores
pub mod constants {
    /// Bytes in a stored prefix
    pub const PREFIX_SIZE: usize = 4;

    /// Bytes in a complete SHA-256 hash
    pub const COMPLETE_SIZE: usize = 32;

    /// Noise prefixes added to a completion request
    pub const DEFAULT_NOISE_COUNT: usize = 4;

    /// Seconds a table's complete hashes are trusted after an update
    pub const DEFAULT_CONFIRM_MAX_AGE_SECS: u64 = 2700;

    /// Table-name suffix selecting the digest chunk layout
    pub const DIGEST_TABLE_SUFFIX: &str = "-digest256";
}
