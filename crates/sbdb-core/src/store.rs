//! Per-table prefix store with chunk provenance
//!
//! A `PrefixStore` is logically a set of `(chunk, prefix)` and `(chunk, hash)`
//! entries plus the chunk numbers the server has delivered. Subs remove the
//! exact `(add_chunk, prefix)` pair they reference; a sub that arrives before
//! its add is kept pending and knocks the add out once it shows up.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkSet;
use crate::hash::{CompleteHash, Prefix};
use crate::table_update::{AddComplete, AddPrefix, SubComplete, SubPrefix, TableUpdate};
use crate::Error;

/// Magic bytes identifying a serialized prefix store
pub const STORE_MAGIC: [u8; 4] = *b"SBS1";

/// Outcome counters of one `PrefixStore::apply`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub added: usize,
    pub knocked_out: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixStore {
    table: String,
    add_chunks: ChunkSet,
    sub_chunks: ChunkSet,
    /// Sorted by (prefix, chunk), no duplicates
    add_prefixes: Vec<AddPrefix>,
    /// Subs still waiting for their add
    sub_prefixes: Vec<SubPrefix>,
    /// Sorted by (hash, chunk), no duplicates
    add_completes: Vec<AddComplete>,
    sub_completes: Vec<SubComplete>,
}

impl PrefixStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn add_chunks(&self) -> &ChunkSet {
        &self.add_chunks
    }

    pub fn sub_chunks(&self) -> &ChunkSet {
        &self.sub_chunks
    }

    pub fn add_prefixes(&self) -> &[AddPrefix] {
        &self.add_prefixes
    }

    pub fn pending_subs(&self) -> usize {
        self.sub_prefixes.len() + self.sub_completes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.add_chunks.is_empty()
            && self.sub_chunks.is_empty()
            && self.add_prefixes.is_empty()
            && self.add_completes.is_empty()
            && self.pending_subs() == 0
    }

    /// Merge an update: adds first, then subs, then expirations.
    pub fn apply(&mut self, update: &TableUpdate) -> ApplyStats {
        let mut stats = ApplyStats::default();

        self.add_chunks.merge(&update.add_chunks);
        self.sub_chunks.merge(&update.sub_chunks);

        let before = self.add_prefixes.len() + self.add_completes.len();
        self.add_prefixes.extend_from_slice(&update.add_prefixes);
        self.add_completes.extend_from_slice(&update.add_completes);
        self.sort_and_dedup();
        stats.added = self.add_prefixes.len() + self.add_completes.len() - before;

        self.sub_prefixes.extend_from_slice(&update.sub_prefixes);
        self.sub_completes.extend_from_slice(&update.sub_completes);
        stats.knocked_out = self.knockout_subs();

        stats.expired = self.expire(&update.add_expirations, &update.sub_expirations);
        stats
    }

    fn sort_and_dedup(&mut self) {
        self.add_prefixes.sort_by_key(|a| (a.prefix, a.chunk));
        self.add_prefixes.dedup();
        self.add_completes.sort_by_key(|a| (a.hash, a.chunk));
        self.add_completes.dedup();
    }

    /// Remove every add cancelled by a pending sub, consuming the matched subs
    fn knockout_subs(&mut self) -> usize {
        let mut removed = 0;

        let mut pending = Vec::with_capacity(self.sub_prefixes.len());
        for sub in std::mem::take(&mut self.sub_prefixes) {
            let target = AddPrefix {
                chunk: sub.add_chunk,
                prefix: sub.prefix,
            };
            match self
                .add_prefixes
                .binary_search_by_key(&(target.prefix, target.chunk), |a| (a.prefix, a.chunk))
            {
                Ok(idx) => {
                    self.add_prefixes.remove(idx);
                    removed += 1;
                }
                Err(_) => pending.push(sub),
            }
        }
        pending.sort();
        pending.dedup();
        self.sub_prefixes = pending;

        let mut pending = Vec::with_capacity(self.sub_completes.len());
        for sub in std::mem::take(&mut self.sub_completes) {
            match self
                .add_completes
                .binary_search_by_key(&(sub.hash, sub.add_chunk), |a| (a.hash, a.chunk))
            {
                Ok(idx) => {
                    self.add_completes.remove(idx);
                    removed += 1;
                }
                Err(_) => pending.push(sub),
            }
        }
        pending.sort();
        pending.dedup();
        self.sub_completes = pending;

        removed
    }

    /// Drop every entry belonging to an expired chunk. Expiring an already
    /// expired chunk is a no-op.
    pub fn expire(&mut self, add_expired: &ChunkSet, sub_expired: &ChunkSet) -> usize {
        let before = self.add_prefixes.len()
            + self.add_completes.len()
            + self.sub_prefixes.len()
            + self.sub_completes.len();

        if !add_expired.is_empty() {
            self.add_prefixes.retain(|a| !add_expired.contains(a.chunk));
            self.add_completes.retain(|a| !add_expired.contains(a.chunk));
            self.add_chunks.remove(add_expired);
        }
        if !sub_expired.is_empty() {
            self.sub_prefixes.retain(|s| !sub_expired.contains(s.chunk));
            self.sub_completes.retain(|s| !sub_expired.contains(s.chunk));
            self.sub_chunks.remove(sub_expired);
        }

        before
            - (self.add_prefixes.len()
                + self.add_completes.len()
                + self.sub_prefixes.len()
                + self.sub_completes.len())
    }

    pub fn has_prefix(&self, prefix: Prefix) -> bool {
        let idx = self.add_prefixes.partition_point(|a| a.prefix < prefix);
        self.add_prefixes
            .get(idx)
            .map(|a| a.prefix == prefix)
            .unwrap_or(false)
    }

    pub fn has_complete(&self, hash: &CompleteHash) -> bool {
        let idx = self.add_completes.partition_point(|a| a.hash < *hash);
        self.add_completes
            .get(idx)
            .map(|a| a.hash == *hash)
            .unwrap_or(false)
    }

    /// True if any complete hash in the store truncates to `prefix`
    pub fn has_complete_prefix(&self, prefix: Prefix) -> bool {
        self.add_completes.iter().any(|a| a.hash.prefix() == prefix)
    }

    /// Distinct prefixes known to this table, sorted
    pub fn distinct_prefixes(&self) -> Vec<Prefix> {
        let mut out: Vec<Prefix> = self
            .add_prefixes
            .iter()
            .map(|a| a.prefix)
            .chain(self.add_completes.iter().map(|a| a.hash.prefix()))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Pick up to `count` prefixes other than `exclude`.
    ///
    /// Seeded by the excluded prefix so repeated lookups of the same URL send
    /// the same noise, which keeps the real prefix from standing out across
    /// requests.
    pub fn noise_prefixes(&self, exclude: Prefix, count: usize) -> Vec<Prefix> {
        let candidates: Vec<Prefix> = self
            .distinct_prefixes()
            .into_iter()
            .filter(|p| *p != exclude)
            .collect();
        let amount = count.min(candidates.len());
        if amount == 0 {
            return Vec::new();
        }
        let mut rng = StdRng::seed_from_u64(exclude.to_u32() as u64);
        sample(&mut rng, candidates.len(), amount)
            .into_iter()
            .map(|i| candidates[i])
            .collect()
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut out = STORE_MAGIC.to_vec();
        out.extend(bincode::serialize(self)?);
        Ok(out)
    }

    pub fn from_bytes(table: &str, data: &[u8]) -> crate::Result<Self> {
        if data.len() < STORE_MAGIC.len() || data[..STORE_MAGIC.len()] != STORE_MAGIC {
            return Err(Error::StoreOpen {
                table: table.to_string(),
                reason: "missing store magic".to_string(),
            });
        }
        let store: PrefixStore = bincode::deserialize(&data[STORE_MAGIC.len()..])?;
        if store.table != table {
            return Err(Error::StoreOpen {
                table: table.to_string(),
                reason: format!("file belongs to table {}", store.table),
            });
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: u32) -> Prefix {
        Prefix::from(n)
    }

    fn adds(table: &str, chunk: u32, prefixes: &[u32]) -> TableUpdate {
        let mut update = TableUpdate::new(table);
        update.new_chunk(crate::ChunkType::Add, chunk);
        for &n in prefixes {
            update.new_add_prefix(chunk, p(n));
        }
        update
    }

    #[test]
    fn test_add_then_sub_same_chunk() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &[10, 20]));
        assert!(store.has_prefix(p(10)));

        let mut sub = TableUpdate::new("t");
        sub.new_chunk(crate::ChunkType::Sub, 2);
        sub.new_sub_prefix(2, 1, p(10));
        let stats = store.apply(&sub);

        assert_eq!(stats.knocked_out, 1);
        assert!(!store.has_prefix(p(10)));
        assert!(store.has_prefix(p(20)));
        assert_eq!(store.pending_subs(), 0);
    }

    #[test]
    fn test_sub_with_other_chunk_keeps_prefix() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &[10]));

        let mut sub = TableUpdate::new("t");
        sub.new_sub_prefix(2, 7, p(10));
        store.apply(&sub);

        assert!(store.has_prefix(p(10)));
        assert_eq!(store.pending_subs(), 1);
    }

    #[test]
    fn test_sub_before_add_knocks_out_later() {
        let mut store = PrefixStore::new("t");
        let mut sub = TableUpdate::new("t");
        sub.new_sub_prefix(2, 1, p(10));
        store.apply(&sub);
        assert_eq!(store.pending_subs(), 1);

        store.apply(&adds("t", 1, &[10]));
        assert!(!store.has_prefix(p(10)));
        assert_eq!(store.pending_subs(), 0);
    }

    #[test]
    fn test_add_and_sub_in_one_update() {
        let mut update = adds("t", 1, &[10, 11]);
        update.new_sub_prefix(2, 1, p(11));
        let mut store = PrefixStore::new("t");
        store.apply(&update);
        assert!(store.has_prefix(p(10)));
        assert!(!store.has_prefix(p(11)));
    }

    #[test]
    fn test_readd_under_new_chunk_survives_sub() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &[10]));
        store.apply(&adds("t", 3, &[10]));

        let mut sub = TableUpdate::new("t");
        sub.new_sub_prefix(4, 1, p(10));
        store.apply(&sub);

        assert!(store.has_prefix(p(10)));
        assert_eq!(store.add_prefixes(), &[AddPrefix { chunk: 3, prefix: p(10) }]);
    }

    #[test]
    fn test_duplicate_adds_collapse() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &[10, 10]));
        store.apply(&adds("t", 1, &[10]));
        assert_eq!(store.add_prefixes().len(), 1);
    }

    #[test]
    fn test_expire_twice_is_idempotent() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &[10]));
        store.apply(&adds("t", 2, &[20]));

        let mut expire = TableUpdate::new("t");
        expire.new_add_expiration(&"1".parse().unwrap());
        store.apply(&expire);
        let once = store.clone();
        store.apply(&expire);

        assert_eq!(store, once);
        assert!(!store.has_prefix(p(10)));
        assert!(store.has_prefix(p(20)));
        assert_eq!(store.add_chunks().to_string(), "2");
    }

    #[test]
    fn test_complete_hash_lookup() {
        let hash = CompleteHash::of_fragment("evil.example/");
        let mut update = TableUpdate::new("t-digest256");
        update.new_add_complete(5, hash);
        let mut store = PrefixStore::new("t-digest256");
        store.apply(&update);

        assert!(store.has_complete(&hash));
        assert!(store.has_complete_prefix(hash.prefix()));
        assert!(!store.has_prefix(hash.prefix()));

        let mut sub = TableUpdate::new("t-digest256");
        sub.new_sub_complete(6, 5, hash);
        store.apply(&sub);
        assert!(!store.has_complete(&hash));
    }

    #[test]
    fn test_noise_excludes_real_prefix_and_is_stable() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &(1..50).collect::<Vec<_>>()));

        let noise = store.noise_prefixes(p(7), 4);
        assert_eq!(noise.len(), 4);
        assert!(!noise.contains(&p(7)));
        assert_eq!(noise, store.noise_prefixes(p(7), 4));
    }

    #[test]
    fn test_noise_on_tiny_table() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &[7]));
        assert!(store.noise_prefixes(p(7), 4).is_empty());
    }

    #[test]
    fn test_bytes_roundtrip_checks_table() {
        let mut store = PrefixStore::new("t");
        store.apply(&adds("t", 1, &[10]));
        let bytes = store.to_bytes().unwrap();
        assert_eq!(&bytes[..4], b"SBS1");
        assert_eq!(PrefixStore::from_bytes("t", &bytes).unwrap(), store);
        assert!(PrefixStore::from_bytes("other", &bytes).is_err());
        assert!(PrefixStore::from_bytes("t", b"junk").is_err());
    }
}
