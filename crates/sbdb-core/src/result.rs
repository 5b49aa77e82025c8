//! Per-lookup match records and completion cache entries

use crate::hash::{CompleteHash, Prefix};

/// One matched (or noise) prefix for a single lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub table: String,
    pub prefix: Prefix,
    /// Hash of the fragment that produced the match; for noise results only
    /// the prefix is meaningful
    pub hash: CompleteHash,
    /// Set once a completion returned a full hash equal to `hash`
    pub confirmed: bool,
    /// The store itself held the complete hash
    pub complete: bool,
    /// Table was updated within the confirm age
    pub fresh: bool,
    /// Synthetic entry padding a completion request
    pub noise: bool,
}

impl LookupResult {
    pub fn matched(table: impl Into<String>, hash: CompleteHash, complete: bool, fresh: bool) -> Self {
        Self {
            table: table.into(),
            prefix: hash.prefix(),
            hash,
            confirmed: false,
            complete,
            fresh,
            noise: false,
        }
    }

    pub fn noise(table: impl Into<String>, prefix: Prefix) -> Self {
        let mut hash = [0u8; crate::constants::COMPLETE_SIZE];
        hash[..crate::constants::PREFIX_SIZE].copy_from_slice(prefix.as_bytes());
        Self {
            table: table.into(),
            prefix,
            hash: CompleteHash(hash),
            confirmed: false,
            complete: false,
            fresh: false,
            noise: true,
        }
    }

    /// Verified either by a completion or by a fresh complete-hash entry
    pub fn is_confirmed(&self) -> bool {
        self.confirmed || (self.complete && self.fresh)
    }
}

/// A completion worth persisting as a local complete-hash entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheEntry {
    pub hash: CompleteHash,
    pub chunk: u32,
}

/// Completions for one table, persisted through a local update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResult {
    pub table: String,
    pub entry: CacheEntry,
}
