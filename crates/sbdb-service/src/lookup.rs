//! Lookup queue and the per-lookup completion state machine
//!
//! A lookup moves through three phases:
//!
//! 1. queued: a [`PendingLookup`] waits in the shared [`LookupQueue`]
//! 2. completing: the worker checked the stores and issued completion
//!    requests for unconfirmed matches; a [`LookupCallback`] counts the
//!    outstanding requests
//! 3. done: the confirmed tables are joined into the verdict string and
//!    the caller's handler runs exactly once

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use sbdb_core::{CacheEntry, CacheResult, ClassifierConfig, CompleteHash, LookupResult, Prefix};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::completer::{CompletionEvent, CompletionReply, HashCompleter, LookupId, RequestId};
use crate::error::CompletionError;
use crate::metrics;

/// Receives the comma-joined list of tables a URL is listed in (empty when
/// clean)
pub type LookupHandler = Box<dyn FnOnce(String) + Send>;

pub struct PendingLookup {
    pub key: String,
    pub queued_at: Instant,
    handler: LookupHandler,
}

impl PendingLookup {
    pub fn new(key: impl Into<String>, handler: LookupHandler) -> Self {
        Self {
            key: key.into(),
            queued_at: Instant::now(),
            handler,
        }
    }

    pub(crate) fn into_handler(self) -> LookupHandler {
        self.handler
    }
}

impl fmt::Debug for PendingLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLookup")
            .field("key", &self.key)
            .field("queued_at", &self.queued_at)
            .finish_non_exhaustive()
    }
}

/// Lookups waiting for the worker. Appending only holds the lock for the
/// push and never triggers processing.
#[derive(Clone, Default)]
pub struct LookupQueue {
    inner: Arc<Mutex<VecDeque<PendingLookup>>>,
}

impl LookupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_lookup(&self, lookup: PendingLookup) {
        self.inner.lock().push_back(lookup);
    }

    /// Take every queued lookup in FIFO order
    pub fn drain(&self) -> Vec<PendingLookup> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// What a finalized lookup hands back for caching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupOutcome {
    /// Sorted, comma-joined confirmed tables
    pub tables: String,
    /// Prefixes whose completion succeeded without returning any hash
    pub misses: Vec<Prefix>,
    pub completions: Vec<CacheResult>,
}

pub(crate) struct LookupCallback {
    handler: LookupHandler,
    results: Vec<LookupResult>,
    /// Requests a completer accepted and has not finished yet. Events for
    /// any other request are ignored.
    outstanding: HashSet<RequestId>,
    next_request: RequestId,
    /// Prefixes whose completion request finished successfully
    succeeded: Vec<Prefix>,
    /// Prefixes that received at least one completion
    answered: HashSet<Prefix>,
    completions: Vec<CacheResult>,
    started: Instant,
}

impl LookupCallback {
    /// `results == None` means the lookup itself failed
    pub(crate) fn new(handler: LookupHandler, results: Option<Vec<LookupResult>>, started: Instant) -> Self {
        Self {
            handler,
            results: results.unwrap_or_default(),
            outstanding: HashSet::new(),
            next_request: 0,
            succeeded: Vec::new(),
            answered: HashSet::new(),
            completions: Vec::new(),
            started,
        }
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    pub(crate) fn is_done(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Issue one completion request per unconfirmed result.
    ///
    /// `completer_for` is consulted once per table. Without a completer a
    /// partial match is trusted only if the store held its complete hash.
    pub(crate) fn start<F>(
        &mut self,
        id: LookupId,
        events: &mpsc::UnboundedSender<CompletionEvent>,
        mut completer_for: F,
    ) where
        F: FnMut(&str) -> Option<Arc<dyn HashCompleter>>,
    {
        let mut completers: HashMap<String, Option<Arc<dyn HashCompleter>>> = HashMap::new();
        let mut requested: HashSet<(String, Prefix)> = HashSet::new();

        for result in self.results.iter_mut() {
            if result.is_confirmed() {
                continue;
            }
            let completer = completers
                .entry(result.table.clone())
                .or_insert_with(|| completer_for(&result.table))
                .clone();

            let Some(completer) = completer else {
                if result.noise {
                    continue;
                }
                if result.complete {
                    debug!(table = %result.table, "Trusting stored complete hash without a completer");
                    result.confirmed = true;
                } else {
                    warn!(
                        table = %result.table,
                        "No hash completer for table, dropping unconfirmed partial match"
                    );
                }
                continue;
            };

            if !requested.insert((result.table.clone(), result.prefix)) {
                continue;
            }
            let request = self.next_request;
            self.next_request += 1;
            let reply = CompletionReply::new(id, request, result.prefix, events.clone());
            match completer.complete(result.prefix, reply) {
                Ok(()) => {
                    self.outstanding.insert(request);
                    metrics::record_completion_request(metrics::OUTCOME_OK);
                }
                Err(e) => {
                    warn!(table = %result.table, error = %e, "Completion request not issued");
                    metrics::record_completion_request(metrics::OUTCOME_ERROR);
                }
            }
        }
    }

    /// Apply one event routed to this lookup. Returns true once no request
    /// is outstanding.
    pub(crate) fn on_event(&mut self, event: CompletionEvent) -> bool {
        match event {
            CompletionEvent::Completion {
                request,
                hash,
                table,
                chunk,
                ..
            } => {
                self.on_completion(request, hash, &table, chunk);
                self.is_done()
            }
            CompletionEvent::Finished {
                request,
                prefix,
                status,
                ..
            } => self.on_finished(request, prefix, status),
        }
    }

    fn on_completion(&mut self, request: RequestId, hash: CompleteHash, table: &str, chunk: u32) {
        if !self.outstanding.contains(&request) {
            debug!(request, "Completion for a request that was not issued");
            return;
        }
        self.answered.insert(hash.prefix());
        self.completions.push(CacheResult {
            table: table.to_string(),
            entry: CacheEntry { hash, chunk },
        });
        for result in self.results.iter_mut() {
            if !result.noise && result.table == table && result.hash == hash {
                result.confirmed = true;
            }
        }
    }

    fn on_finished(&mut self, request: RequestId, prefix: Prefix, status: Result<(), CompletionError>) -> bool {
        if !self.outstanding.remove(&request) {
            debug!(request, "Finish for a request that was not issued");
            return self.is_done();
        }
        match status {
            Ok(()) => self.succeeded.push(prefix),
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Completion failed");
                metrics::record_completion_failure();
            }
        }
        self.is_done()
    }

    /// Build the verdict and hand back the handler to answer the caller
    pub(crate) fn finish(self) -> (LookupHandler, LookupOutcome) {
        let tables: BTreeSet<&str> = self
            .results
            .iter()
            .filter(|r| r.is_confirmed() && !r.noise)
            .map(|r| r.table.as_str())
            .collect();
        let tables = tables.into_iter().collect::<Vec<_>>().join(",");

        let real: HashSet<Prefix> = self
            .results
            .iter()
            .filter(|r| !r.noise)
            .map(|r| r.prefix)
            .collect();
        let mut misses: Vec<Prefix> = self
            .succeeded
            .iter()
            .copied()
            .filter(|p| real.contains(p) && !self.answered.contains(p))
            .collect();
        misses.sort();
        misses.dedup();

        let outcome = LookupOutcome {
            tables,
            misses,
            completions: self.completions,
        };
        (self.handler, outcome)
    }
}

/// Verdict derived from a lookup's table string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Clean,
    Malware,
    Phishing,
}

impl Classification {
    /// Malware wins over phishing. Tables from disabled checks are ignored.
    pub fn from_tables(tables: &str, config: &ClassifierConfig) -> Self {
        let listed: Vec<&str> = tables.split(',').filter(|t| !t.is_empty()).collect();
        let hit = |names: Vec<String>| listed.iter().any(|t| names.iter().any(|n| n == t));

        if hit(config.malware_tables()) {
            Classification::Malware
        } else if hit(config.phishing_tables()) {
            Classification::Phishing
        } else {
            Classification::Clean
        }
    }

    pub fn should_block(self) -> bool {
        self != Classification::Clean
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::Clean => "clean",
            Classification::Malware => "malware",
            Classification::Phishing => "phishing",
        };
        f.write_str(name)
    }
}
