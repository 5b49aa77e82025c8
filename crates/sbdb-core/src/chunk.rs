//! Chunk identifiers and compact chunk-number sets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Kind of an update chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkType {
    /// Prefix adds in shavar layout
    Add,
    /// Prefix subs in shavar layout
    Sub,
    /// Complete-hash adds
    AddDigest,
    /// Complete-hash subs
    SubDigest,
}

impl ChunkType {
    pub fn is_add(&self) -> bool {
        matches!(self, ChunkType::Add | ChunkType::AddDigest)
    }

    pub fn is_digest(&self) -> bool {
        matches!(self, ChunkType::AddDigest | ChunkType::SubDigest)
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkType::Add => write!(f, "add"),
            ChunkType::Sub => write!(f, "sub"),
            ChunkType::AddDigest => write!(f, "add-digest"),
            ChunkType::SubDigest => write!(f, "sub-digest"),
        }
    }
}

/// Inclusive range of chunk numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub start: u32,
    pub end: u32,
}

impl ChunkRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn contains(&self, chunk: u32) -> bool {
        self.start <= chunk && chunk <= self.end
    }
}

/// Set of chunk numbers stored as sorted, disjoint, non-adjacent ranges.
///
/// Renders and parses the `1-3,5,7-9` list form used by expiration directives
/// and by table requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSet {
    ranges: Vec<ChunkRange>,
}

impl ChunkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of chunk numbers in the set
    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| (r.end - r.start) as u64 + 1)
            .sum()
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    pub fn contains(&self, chunk: u32) -> bool {
        // ranges are sorted by start
        let idx = self.ranges.partition_point(|r| r.end < chunk);
        self.ranges.get(idx).map(|r| r.contains(chunk)).unwrap_or(false)
    }

    pub fn insert(&mut self, chunk: u32) {
        self.insert_range(ChunkRange::new(chunk, chunk));
    }

    pub fn insert_range(&mut self, range: ChunkRange) {
        self.ranges.push(range);
        self.normalize();
    }

    /// Add every chunk of `other` to this set
    pub fn merge(&mut self, other: &ChunkSet) {
        if other.is_empty() {
            return;
        }
        self.ranges.extend_from_slice(&other.ranges);
        self.normalize();
    }

    /// Remove every chunk of `other` from this set
    pub fn remove(&mut self, other: &ChunkSet) {
        for cut in &other.ranges {
            let mut kept = Vec::with_capacity(self.ranges.len() + 1);
            for r in &self.ranges {
                if r.end < cut.start || r.start > cut.end {
                    kept.push(*r);
                    continue;
                }
                if r.start < cut.start {
                    kept.push(ChunkRange::new(r.start, cut.start - 1));
                }
                if r.end > cut.end {
                    kept.push(ChunkRange::new(cut.end + 1, r.end));
                }
            }
            self.ranges = kept;
        }
    }

    fn normalize(&mut self) {
        self.ranges.sort_by_key(|r| r.start);
        let mut merged: Vec<ChunkRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(r.end);
                }
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }
}

impl FromStr for ChunkSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = ChunkSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let parse = |v: &str| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|_| Error::InvalidChunkList(s.to_string()))
            };
            let range = match part.split_once('-') {
                Some((lo, hi)) => ChunkRange::new(parse(lo)?, parse(hi)?),
                None => {
                    let n = parse(part)?;
                    ChunkRange::new(n, n)
                }
            };
            set.ranges.push(range);
        }
        set.normalize();
        Ok(set)
    }
}

impl fmt::Display for ChunkSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if r.start == r.end {
                write!(f, "{}", r.start)?;
            } else {
                write!(f, "{}-{}", r.start, r.end)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<u32> for ChunkSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = ChunkSet {
            ranges: iter.into_iter().map(|n| ChunkRange::new(n, n)).collect(),
        };
        set.normalize();
        set
    }
}
