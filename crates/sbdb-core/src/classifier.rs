//! Classifier: durable per-table prefix stores, update application and
//! prefix-containment checks
//!
//! The classifier is owned by a single worker and takes `&mut self` for
//! every mutation; it does no locking of its own.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::{validate_table_name, FileBackend, StoreBackend};
use crate::config::ClassifierConfig;
use crate::fragments::LookupKey;
use crate::hash::Prefix;
use crate::result::{CacheResult, LookupResult};
use crate::store::PrefixStore;
use crate::table_update::TableUpdate;
use crate::Result;

pub struct Classifier {
    backend: Box<dyn StoreBackend>,
    stores: BTreeMap<String, PrefixStore>,
    /// Last successful server update per table; absent means stale
    freshness: HashMap<String, Instant>,
    confirm_max_age: Duration,
}

impl Classifier {
    /// Open the on-disk database described by `config`
    pub fn open(config: &ClassifierConfig) -> Result<Self> {
        let backend = FileBackend::open(&config.db_dir)?;
        Self::with_backend(Box::new(backend), config.confirm_max_age())
    }

    /// Open over any backend, loading every committed table
    pub fn with_backend(backend: Box<dyn StoreBackend>, confirm_max_age: Duration) -> Result<Self> {
        let mut stores = BTreeMap::new();
        for table in backend.tables()? {
            if let Some(store) = backend.load(&table)? {
                stores.insert(table, store);
            }
        }
        info!(tables = stores.len(), "Classifier opened");
        Ok(Self {
            backend,
            stores,
            freshness: HashMap::new(),
            confirm_max_age,
        })
    }

    pub fn store(&self, table: &str) -> Option<&PrefixStore> {
        self.stores.get(table)
    }

    /// Names of every table that has a store, sorted
    pub fn active_tables(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub fn is_fresh(&self, table: &str) -> bool {
        self.freshness
            .get(table)
            .map(|at| at.elapsed() < self.confirm_max_age)
            .unwrap_or(false)
    }

    /// Apply a batch of table updates.
    ///
    /// Each table is applied to a copy and committed before the in-memory
    /// store is replaced, so a failed commit leaves that table exactly as it
    /// was. The first failure stops the batch; tables committed before it
    /// keep their new state.
    pub fn apply_updates(&mut self, updates: Vec<TableUpdate>) -> Result<()> {
        for update in updates {
            let table = update.table_name().to_string();
            validate_table_name(&table)?;

            let mut store = self
                .stores
                .get(&table)
                .cloned()
                .unwrap_or_else(|| PrefixStore::new(table.as_str()));
            let stats = store.apply(&update);

            if let Err(e) = self.backend.commit(&store) {
                warn!(table = %table, error = %e, "Failed to commit table update");
                return Err(e);
            }

            info!(
                table = %table,
                local = update.is_local(),
                added = stats.added,
                knocked_out = stats.knocked_out,
                expired = stats.expired,
                prefixes = store.add_prefixes().len(),
                "Applied table update"
            );

            self.stores.insert(table.clone(), store);
            if !update.is_local() {
                self.freshness.insert(table, Instant::now());
            }
        }
        Ok(())
    }

    /// Probe every active table for every fragment of `key`.
    ///
    /// No match is the common answer and yields an empty vector.
    pub fn check(&self, key: &LookupKey) -> Vec<LookupResult> {
        let mut results: Vec<LookupResult> = Vec::new();
        for hash in key.fragment_hashes() {
            for (table, store) in &self.stores {
                let complete = store.has_complete(&hash);
                if !complete && !store.has_prefix(hash.prefix()) {
                    continue;
                }
                let duplicate = results
                    .iter()
                    .any(|r| r.table == *table && r.hash == hash);
                if !duplicate {
                    results.push(LookupResult::matched(
                        table.as_str(),
                        hash,
                        complete,
                        self.is_fresh(table),
                    ));
                }
            }
        }
        debug!(key = %key, matches = results.len(), "Checked lookup key");
        results
    }

    /// Up to `count` prefixes from `table` other than `exclude`.
    ///
    /// An unknown or tiny table yields fewer (possibly zero) entries.
    pub fn read_noise_entries(&self, exclude: Prefix, table: &str, count: usize) -> Vec<Prefix> {
        match self.stores.get(table) {
            Some(store) => store.noise_prefixes(exclude, count),
            None => Vec::new(),
        }
    }

    /// Persist completions as local complete-hash entries
    pub fn cache_completions(&mut self, results: &[CacheResult]) -> Result<()> {
        let mut by_table: BTreeMap<&str, TableUpdate> = BTreeMap::new();
        for result in results {
            by_table
                .entry(result.table.as_str())
                .or_insert_with(|| TableUpdate::local(result.table.as_str()))
                .new_add_complete(result.entry.chunk, result.entry.hash);
        }
        self.apply_updates(by_table.into_values().collect())
    }

    /// Treat `tables` as stale until their next successful update
    pub fn mark_spoiled(&mut self, tables: &[String]) {
        for table in tables {
            self.freshness.remove(table);
            info!(table = %table, "Spoiled table");
        }
    }

    /// Drop every table.
    ///
    /// A table whose removal fails stays loaded, so memory keeps matching
    /// what is left in the backend. The first failure is returned after
    /// every table was tried.
    pub fn reset(&mut self) -> Result<()> {
        let mut kept = Vec::new();
        let mut first_error = None;
        for table in self.backend.tables()? {
            if let Err(e) = self.backend.remove(&table) {
                warn!(table = %table, error = %e, "Failed to remove table");
                kept.push(table);
                first_error.get_or_insert(e);
            }
        }
        self.stores.retain(|table, _| kept.contains(table));
        self.freshness.clear();

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Classifier database reset");
                Ok(())
            }
        }
    }

    /// One `name;a:<ranges>:s:<ranges>` line per table, sorted by name
    pub fn table_request(&self) -> String {
        let mut out = String::new();
        for (table, store) in &self.stores {
            out.push_str(table);
            out.push(';');
            let mut parts = Vec::new();
            if !store.add_chunks().is_empty() {
                parts.push(format!("a:{}", store.add_chunks()));
            }
            if !store.sub_chunks().is_empty() {
                parts.push(format!("s:{}", store.sub_chunks()));
            }
            out.push_str(&parts.join(":"));
            out.push('\n');
        }
        out
    }
}
