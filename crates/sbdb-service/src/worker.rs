//! The worker: sole owner of the classifier, the miss cache and the update
//! pipeline.
//!
//! Runs on one dedicated thread driving a current-thread runtime. Callers
//! reach it only through [`Command`]s; completion replies come back on a
//! separate unbounded channel and are handled before the next command.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::RwLock;
use sbdb_core::{
    CacheResult, Classifier, ClassifierConfig, LookupKey, LookupResult, Prefix, StoreBackend,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::completer::{CompletionEvent, HashCompleter, LookupId};
use crate::error::{Result, ServiceError};
use crate::lookup::{LookupCallback, LookupHandler, LookupQueue};
use crate::metrics;
use crate::miss_cache::MissCache;
use crate::update::{UpdateObserver, UpdatePipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    ShuttingDown,
    Stopped,
}

pub(crate) type SharedState = Arc<RwLock<ServiceState>>;

/// Opens the store backend; called again after a failed open
pub(crate) type OpenBackend = Box<dyn FnMut() -> sbdb_core::Result<Box<dyn StoreBackend>> + Send>;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    HandlePendingLookups,
    BeginUpdate {
        observer: Box<dyn UpdateObserver>,
        tables: Vec<String>,
        reply: Reply<()>,
    },
    BeginStream {
        table: Option<String>,
        reply: Reply<()>,
    },
    UpdateStream {
        data: Vec<u8>,
        reply: Reply<()>,
    },
    FinishStream {
        reply: Reply<()>,
    },
    FinishUpdate {
        reply: Reply<()>,
    },
    CancelUpdate {
        reply: Reply<()>,
    },
    ResetDatabase {
        reply: Reply<()>,
    },
    SetHashCompleter {
        table: String,
        completer: Option<Arc<dyn HashCompleter>>,
        reply: Reply<()>,
    },
    CacheCompletions {
        results: Vec<CacheResult>,
        reply: Reply<()>,
    },
    CacheMisses {
        prefixes: Vec<Prefix>,
        reply: Reply<()>,
    },
    TableRequest {
        reply: Reply<String>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct Worker {
    config: ClassifierConfig,
    state: SharedState,
    open_backend: OpenBackend,
    classifier: Option<Classifier>,
    miss_cache: MissCache,
    update: UpdatePipeline,
    lookups: LookupQueue,
    completers: HashMap<String, Arc<dyn HashCompleter>>,
    default_completer: Option<Arc<dyn HashCompleter>>,
    in_flight: HashMap<LookupId, LookupCallback>,
    next_lookup: LookupId,
    events: mpsc::UnboundedSender<CompletionEvent>,
}

impl Worker {
    pub(crate) fn new(
        config: ClassifierConfig,
        state: SharedState,
        open_backend: OpenBackend,
        lookups: LookupQueue,
        completers: HashMap<String, Arc<dyn HashCompleter>>,
        default_completer: Option<Arc<dyn HashCompleter>>,
    ) -> (Self, mpsc::UnboundedReceiver<CompletionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let worker = Self {
            miss_cache: MissCache::new(config.miss_cache_capacity),
            config,
            state,
            open_backend,
            classifier: None,
            update: UpdatePipeline::new(),
            lookups,
            completers,
            default_completer,
            in_flight: HashMap::new(),
            next_lookup: 0,
            events,
        };
        (worker, events_rx)
    }

    /// Move the worker onto its own thread
    pub(crate) fn spawn(
        self,
        runtime: tokio::runtime::Runtime,
        commands: mpsc::Receiver<Command>,
        events: mpsc::UnboundedReceiver<CompletionEvent>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("sbdb-worker".to_string())
            .spawn(move || runtime.block_on(self.run(commands, events)))
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<CompletionEvent>,
    ) {
        info!("Classifier worker started");
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_completion_event(event),
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
            }
        }
        info!("Classifier worker stopped");
    }

    /// Returns false once the worker should exit
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::HandlePendingLookups => self.handle_pending_lookups(),
            Command::BeginUpdate {
                observer,
                tables,
                reply,
            } => {
                let _ = reply.send(self.begin_update(observer, tables));
            }
            Command::BeginStream { table, reply } => {
                let result = self
                    .check_running()
                    .and_then(|_| self.update.begin_stream(table.as_deref()));
                let _ = reply.send(result);
            }
            Command::UpdateStream { data, reply } => {
                let result = self
                    .check_running()
                    .and_then(|_| self.update.update_stream(&data));
                let _ = reply.send(result);
            }
            Command::FinishStream { reply } => {
                let _ = reply.send(self.finish_stream());
            }
            Command::FinishUpdate { reply } => {
                let _ = reply.send(self.finish_update());
            }
            Command::CancelUpdate { reply } => {
                let _ = reply.send(self.cancel_update());
            }
            Command::ResetDatabase { reply } => {
                let _ = reply.send(self.reset_database());
            }
            Command::SetHashCompleter {
                table,
                completer,
                reply,
            } => {
                let result = self.check_running().map(|_| match completer {
                    Some(completer) => {
                        debug!(table = %table, "Registered hash completer");
                        self.completers.insert(table, completer);
                    }
                    None => {
                        self.completers.remove(&table);
                    }
                });
                let _ = reply.send(result);
            }
            Command::CacheCompletions { results, reply } => {
                let _ = reply.send(self.cache_completions(&results));
            }
            Command::CacheMisses { prefixes, reply } => {
                let result = self
                    .check_running()
                    .map(|_| self.miss_cache.extend(prefixes));
                let _ = reply.send(result);
            }
            Command::TableRequest { reply } => {
                let result = self.classifier_mut().map(|c| c.table_request());
                let _ = reply.send(result);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn check_running(&self) -> Result<()> {
        match *self.state.read() {
            ServiceState::Running => Ok(()),
            _ => Err(ServiceError::NotInitialized),
        }
    }

    /// Open the stores on first use; a failed open is retried next time
    fn ensure_classifier(&mut self) -> Result<()> {
        if self.classifier.is_some() {
            return Ok(());
        }
        let backend = (self.open_backend)().map_err(|e| ServiceError::DbOpen(e.to_string()))?;
        let classifier = Classifier::with_backend(backend, self.config.confirm_max_age())
            .map_err(|e| ServiceError::DbOpen(e.to_string()))?;
        metrics::set_active_tables(classifier.active_tables().len());
        self.classifier = Some(classifier);
        Ok(())
    }

    fn classifier_mut(&mut self) -> Result<&mut Classifier> {
        self.check_running()?;
        self.ensure_classifier()?;
        self.classifier
            .as_mut()
            .ok_or_else(|| ServiceError::DbOpen("store not open".to_string()))
    }

    fn handle_pending_lookups(&mut self) {
        let pending = self.lookups.drain();
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "Handling pending lookups");

        for lookup in pending {
            let results = match self.do_lookup(&lookup.key) {
                Ok(results) => Some(results),
                Err(e) => {
                    warn!(error = %e, "Lookup failed");
                    metrics::record_lookup_error();
                    None
                }
            };
            let started = lookup.queued_at;
            self.lookup_complete(lookup.into_handler(), results, started);
        }
        metrics::set_lookups_in_flight(self.in_flight.len());
    }

    fn do_lookup(&mut self, key: &str) -> Result<Vec<LookupResult>> {
        self.check_running()?;
        self.ensure_classifier()?;
        let Some(classifier) = self.classifier.as_ref() else {
            return Err(ServiceError::DbOpen("store not open".to_string()));
        };

        let Some(lookup_key) = LookupKey::parse(key) else {
            debug!("Lookup key has no host, treating as clean");
            return Ok(Vec::new());
        };

        let mut results = classifier.check(&lookup_key);
        let miss_cache = &self.miss_cache;
        results.retain(|r| !miss_cache.contains(r.prefix));

        // noise once per lookup, keyed off the first result needing completion
        let first = results
            .iter()
            .find(|r| !r.is_confirmed())
            .map(|r| (r.prefix, r.table.clone()));
        if let Some((prefix, table)) = first {
            let noise = classifier.read_noise_entries(prefix, &table, self.config.gethash_noise_count);
            results.extend(noise.into_iter().map(|p| LookupResult::noise(table.as_str(), p)));
        }
        Ok(results)
    }

    fn lookup_complete(&mut self, handler: LookupHandler, results: Option<Vec<LookupResult>>, started: Instant) {
        let id = self.next_lookup;
        self.next_lookup += 1;

        let mut callback = LookupCallback::new(handler, results, started);
        let completers = &self.completers;
        let default_completer = &self.default_completer;
        let config = &self.config;
        callback.start(id, &self.events, |table| {
            completers.get(table).cloned().or_else(|| {
                if config.requires_completion(table) {
                    default_completer.clone()
                } else {
                    None
                }
            })
        });

        if callback.is_done() {
            self.finalize(callback);
        } else {
            self.in_flight.insert(id, callback);
        }
    }

    fn handle_completion_event(&mut self, event: CompletionEvent) {
        let lookup = event.lookup();
        let Some(callback) = self.in_flight.get_mut(&lookup) else {
            debug!(lookup, "Completion event for a finished lookup");
            return;
        };
        if callback.on_event(event) {
            if let Some(callback) = self.in_flight.remove(&lookup) {
                self.finalize(callback);
            }
        }
    }

    fn finalize(&mut self, callback: LookupCallback) {
        let started = callback.started();
        let (handler, outcome) = callback.finish();

        if self.check_running().is_ok() {
            self.miss_cache.extend(outcome.misses.iter().copied());
            if !outcome.completions.is_empty() {
                if let Some(classifier) = self.classifier.as_mut() {
                    if let Err(e) = classifier.cache_completions(&outcome.completions) {
                        warn!(error = %e, "Failed to cache completions");
                    }
                }
            }
        }

        let verdict = if outcome.tables.is_empty() {
            metrics::VERDICT_CLEAN
        } else {
            metrics::VERDICT_LISTED
        };
        metrics::record_lookup(verdict, started.elapsed());
        debug!(
            tables = %outcome.tables,
            misses = outcome.misses.len(),
            completions = outcome.completions.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Lookup finished"
        );
        handler(outcome.tables);
        metrics::set_lookups_in_flight(self.in_flight.len());
    }

    fn begin_update(&mut self, mut observer: Box<dyn UpdateObserver>, tables: Vec<String>) -> Result<()> {
        self.check_running()?;
        if let Err(e) = self.ensure_classifier() {
            observer.update_error(&e);
            return Err(e);
        }
        self.update.begin_update(observer, tables)
    }

    fn finish_stream(&mut self) -> Result<()> {
        self.check_running()?;
        self.ensure_classifier()?;
        let Some(classifier) = self.classifier.as_mut() else {
            return Err(ServiceError::DbOpen("store not open".to_string()));
        };
        self.update.finish_stream(classifier)
    }

    fn finish_update(&mut self) -> Result<()> {
        self.check_running()?;
        self.ensure_classifier()?;
        let Some(classifier) = self.classifier.as_mut() else {
            return Err(ServiceError::DbOpen("store not open".to_string()));
        };
        let result = self.update.finish_update(classifier, &mut self.miss_cache);
        metrics::set_active_tables(classifier.active_tables().len());
        result
    }

    fn cancel_update(&mut self) -> Result<()> {
        self.check_running()?;
        self.ensure_classifier()?;
        let Some(classifier) = self.classifier.as_mut() else {
            return Err(ServiceError::DbOpen("store not open".to_string()));
        };
        self.update.cancel_update(classifier)
    }

    fn reset_database(&mut self) -> Result<()> {
        self.check_running()?;
        self.ensure_classifier()?;
        let Some(classifier) = self.classifier.as_mut() else {
            return Err(ServiceError::DbOpen("store not open".to_string()));
        };
        if self.update.in_progress() {
            self.update.cancel_update(classifier)?;
        }
        let reset = classifier.reset();
        self.miss_cache.clear();
        metrics::set_active_tables(classifier.active_tables().len());
        reset?;
        Ok(())
    }

    fn cache_completions(&mut self, results: &[CacheResult]) -> Result<()> {
        self.classifier_mut()?.cache_completions(results)?;
        Ok(())
    }

    /// Answer everything still waiting, then close the stores exactly once
    fn shutdown(&mut self) {
        *self.state.write() = ServiceState::ShuttingDown;
        info!(
            queued = self.lookups.len(),
            in_flight = self.in_flight.len(),
            "Classifier worker shutting down"
        );

        // queued lookups now fail fast and answer clean
        self.handle_pending_lookups();
        for (_, callback) in self.in_flight.drain() {
            let (handler, outcome) = callback.finish();
            handler(outcome.tables);
        }
        if let (true, Some(classifier)) = (self.update.in_progress(), self.classifier.as_mut()) {
            let _ = self.update.cancel_update(classifier);
        }
        if self.classifier.take().is_some() {
            info!("Closed prefix stores");
        }
        *self.state.write() = ServiceState::Stopped;
    }
}
