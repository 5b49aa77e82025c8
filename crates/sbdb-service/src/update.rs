//! Update session sequencing
//!
//! ```text
//! begin_update -> (begin_stream -> update_stream* -> finish_stream)* -> finish_update
//! ```
//!
//! Steps are checked explicitly; an out-of-order call returns
//! `InvalidState` and changes nothing. `cancel_update` is accepted at any
//! point after `begin_update`.

use std::time::Instant;

use sbdb_core::{Classifier, TableUpdate};
use sbdb_updater::ProtocolParser;
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::metrics;
use crate::miss_cache::MissCache;

/// Receives the progress of one update session, on the worker thread
pub trait UpdateObserver: Send {
    /// The stream forwarded the client to more data for `table`
    fn update_url_requested(&mut self, url: &str, table: &str) {
        let _ = (url, table);
    }

    /// One stream was consumed; `error` is set when it failed to parse
    fn stream_finished(&mut self, error: Option<&ServiceError>) {
        let _ = error;
    }

    fn update_error(&mut self, error: &ServiceError);

    /// All streams applied; poll again after `wait_secs`
    fn update_success(&mut self, wait_secs: u32);
}

struct Session {
    observer: Box<dyn UpdateObserver>,
    /// Tables spoiled if the session fails
    tables: Vec<String>,
    updates: Vec<TableUpdate>,
    update_wait: u32,
    failure: Option<ServiceError>,
    started: Instant,
}

#[derive(Default)]
pub struct UpdatePipeline {
    session: Option<Session>,
    parser: ProtocolParser,
    stream_open: bool,
}

impl UpdatePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.session.is_some()
    }

    pub fn begin_update(&mut self, observer: Box<dyn UpdateObserver>, tables: Vec<String>) -> Result<()> {
        if self.session.is_some() {
            return Err(ServiceError::InvalidState("an update is already in progress"));
        }
        info!(tables = ?tables, "Beginning update");
        self.session = Some(Session {
            observer,
            tables,
            updates: Vec::new(),
            update_wait: 0,
            failure: None,
            started: Instant::now(),
        });
        Ok(())
    }

    /// Open a stream; `table` preselects the table for streams that start
    /// directly with chunk data
    pub fn begin_stream(&mut self, table: Option<&str>) -> Result<()> {
        if self.session.is_none() {
            return Err(ServiceError::InvalidState("begin_stream without begin_update"));
        }
        if self.stream_open {
            return Err(ServiceError::InvalidState("a stream is already open"));
        }
        let mut parser = ProtocolParser::new();
        if let Some(table) = table.filter(|t| !t.is_empty()) {
            parser.set_current_table(table)?;
        }
        self.parser = parser;
        self.stream_open = true;
        Ok(())
    }

    /// Feed stream bytes. A parse error is also recorded on the session.
    pub fn update_stream(&mut self, data: &[u8]) -> Result<()> {
        if !self.stream_open {
            return Err(ServiceError::InvalidState("update_stream without begin_stream"));
        }
        self.parser.append_stream(data)?;
        Ok(())
    }

    pub fn finish_stream(&mut self, classifier: &mut Classifier) -> Result<()> {
        if !self.stream_open {
            return Err(ServiceError::InvalidState("finish_stream without begin_stream"));
        }
        let Some(session) = self.session.as_mut() else {
            return Err(ServiceError::InvalidState("finish_stream without begin_update"));
        };
        self.stream_open = false;

        if let Err(e) = self.parser.finish_stream() {
            let error = ServiceError::Parse(e.clone());
            session.observer.stream_finished(Some(&error));
            session.failure.get_or_insert(error);
            return Err(ServiceError::Parse(e));
        }

        for forward in self.parser.forwards() {
            session
                .observer
                .update_url_requested(&forward.url, &forward.table);
        }

        if self.parser.reset_requested() {
            warn!("Update stream requested a database reset");
            if let Err(e) = classifier.reset() {
                warn!(error = %e, "Database reset failed");
                let error = ServiceError::ResetFailed(e.to_string());
                session.observer.stream_finished(Some(&error));
                session.failure.get_or_insert(ServiceError::ResetFailed(e.to_string()));
                return Err(error);
            }
            session.updates.clear();
        }

        if self.parser.update_wait() > 0 {
            session.update_wait = self.parser.update_wait();
        }
        session.updates.extend(self.parser.forget_table_updates());
        session.observer.stream_finished(None);
        Ok(())
    }

    /// Apply everything gathered. Failure is reported to the observer and
    /// spoils the session's tables; the session is closed either way.
    pub fn finish_update(&mut self, classifier: &mut Classifier, miss_cache: &mut MissCache) -> Result<()> {
        if self.stream_open {
            return Err(ServiceError::InvalidState("finish_update with a stream still open"));
        }
        let Some(mut session) = self.session.take() else {
            return Err(ServiceError::InvalidState("finish_update without begin_update"));
        };

        let applied = match session.failure.take() {
            Some(failure) => Err(failure),
            None => classifier
                .apply_updates(std::mem::take(&mut session.updates))
                .map_err(ServiceError::from),
        };

        match applied {
            Ok(()) => {
                miss_cache.clear();
                info!(
                    wait_secs = session.update_wait,
                    elapsed_ms = session.started.elapsed().as_millis() as u64,
                    "Update finished"
                );
                metrics::record_update(metrics::OUTCOME_OK, session.started.elapsed());
                session.observer.update_success(session.update_wait);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Update failed");
                metrics::record_update(metrics::OUTCOME_ERROR, session.started.elapsed());
                session.observer.update_error(&e);
                spoil(classifier, &session.tables);
                Err(e)
            }
        }
    }

    /// Abort the session: report an error and spoil its tables
    pub fn cancel_update(&mut self, classifier: &mut Classifier) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Err(ServiceError::InvalidState("cancel_update without begin_update"));
        };
        self.stream_open = false;
        self.parser.begin();

        warn!(tables = ?session.tables, "Update canceled");
        metrics::record_update(metrics::OUTCOME_CANCELED, session.started.elapsed());
        session.observer.update_error(&ServiceError::UpdateCanceled);
        spoil(classifier, &session.tables);
        Ok(())
    }
}

fn spoil(classifier: &mut Classifier, tables: &[String]) {
    classifier.mark_spoiled(tables);
    metrics::record_spoiled(tables.len());
}
