//! Per-table update accumulator produced by the protocol parser

use serde::{Deserialize, Serialize};

use crate::chunk::{ChunkSet, ChunkType};
use crate::hash::{CompleteHash, Prefix};

/// A prefix added by an add chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddPrefix {
    pub chunk: u32,
    pub prefix: Prefix,
}

/// A prefix removed by a sub chunk; `add_chunk` names the add it cancels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubPrefix {
    pub chunk: u32,
    pub add_chunk: u32,
    pub prefix: Prefix,
}

impl SubPrefix {
    pub fn cancels(&self, add: &AddPrefix) -> bool {
        self.add_chunk == add.chunk && self.prefix == add.prefix
    }
}

/// A complete hash added by a digest add chunk or a cached completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddComplete {
    pub chunk: u32,
    pub hash: CompleteHash,
}

/// A complete hash removed by a digest sub chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubComplete {
    pub chunk: u32,
    pub add_chunk: u32,
    pub hash: CompleteHash,
}

impl SubComplete {
    pub fn cancels(&self, add: &AddComplete) -> bool {
        self.add_chunk == add.chunk && self.hash == add.hash
    }
}

/// Everything one update session says about a single table.
///
/// Created lazily by the parser the first time a table is referenced and
/// moved into the classifier when the session is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableUpdate {
    table: String,
    /// True for updates built from cached completions rather than the server
    local: bool,
    pub add_chunks: ChunkSet,
    pub sub_chunks: ChunkSet,
    pub add_expirations: ChunkSet,
    pub sub_expirations: ChunkSet,
    pub add_prefixes: Vec<AddPrefix>,
    pub sub_prefixes: Vec<SubPrefix>,
    pub add_completes: Vec<AddComplete>,
    pub sub_completes: Vec<SubComplete>,
}

impl TableUpdate {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    /// Update carrying locally cached completions
    pub fn local(table: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::new(table)
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Record that a chunk number was delivered, even if it carried no entries
    pub fn new_chunk(&mut self, kind: ChunkType, chunk: u32) {
        if kind.is_add() {
            self.add_chunks.insert(chunk);
        } else {
            self.sub_chunks.insert(chunk);
        }
    }

    pub fn new_add_prefix(&mut self, chunk: u32, prefix: Prefix) {
        self.add_prefixes.push(AddPrefix { chunk, prefix });
    }

    pub fn new_sub_prefix(&mut self, chunk: u32, add_chunk: u32, prefix: Prefix) {
        self.sub_prefixes.push(SubPrefix {
            chunk,
            add_chunk,
            prefix,
        });
    }

    pub fn new_add_complete(&mut self, chunk: u32, hash: CompleteHash) {
        self.add_completes.push(AddComplete { chunk, hash });
    }

    pub fn new_sub_complete(&mut self, chunk: u32, add_chunk: u32, hash: CompleteHash) {
        self.sub_completes.push(SubComplete {
            chunk,
            add_chunk,
            hash,
        });
    }

    pub fn new_add_expiration(&mut self, chunks: &ChunkSet) {
        self.add_expirations.merge(chunks);
    }

    pub fn new_sub_expiration(&mut self, chunks: &ChunkSet) {
        self.sub_expirations.merge(chunks);
    }

    pub fn is_empty(&self) -> bool {
        self.add_chunks.is_empty()
            && self.sub_chunks.is_empty()
            && self.add_expirations.is_empty()
            && self.sub_expirations.is_empty()
            && self.add_prefixes.is_empty()
            && self.sub_prefixes.is_empty()
            && self.add_completes.is_empty()
            && self.sub_completes.is_empty()
    }
}
