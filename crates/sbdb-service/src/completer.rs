//! Hash completion seam
//!
//! A [`HashCompleter`] exchanges a 4-byte prefix for the full hashes a
//! remote service holds behind it. Requests are fire-and-forget: the
//! completer answers through the [`CompletionReply`] it was handed, from
//! any thread, whenever the answer arrives. Replies are marshalled back
//! onto the worker before any lookup state is touched.

use sbdb_core::{CompleteHash, Prefix};
use tokio::sync::mpsc;

use crate::error::CompletionError;

pub trait HashCompleter: Send + Sync {
    /// Start completing `prefix`. Returning `Err` means the request was not
    /// issued; anything sent through `reply` afterwards, including the
    /// failure reported when it is dropped, is ignored by the lookup.
    fn complete(&self, prefix: Prefix, reply: CompletionReply) -> Result<(), CompletionError>;
}

/// Lookup identifier assigned by the worker
pub(crate) type LookupId = u64;

/// Completion request identifier, unique within one lookup
pub(crate) type RequestId = u32;

#[derive(Debug)]
pub(crate) enum CompletionEvent {
    Completion {
        lookup: LookupId,
        request: RequestId,
        hash: CompleteHash,
        table: String,
        chunk: u32,
    },
    Finished {
        lookup: LookupId,
        request: RequestId,
        prefix: Prefix,
        status: Result<(), CompletionError>,
    },
}

impl CompletionEvent {
    pub(crate) fn lookup(&self) -> LookupId {
        match self {
            CompletionEvent::Completion { lookup, .. } | CompletionEvent::Finished { lookup, .. } => *lookup,
        }
    }
}

/// Answer channel for one completion request.
///
/// Dropping a reply without calling [`finished`](Self::finished) counts as
/// a failed request, so a lookup can never wait forever.
#[derive(Debug)]
pub struct CompletionReply {
    lookup: LookupId,
    request: RequestId,
    prefix: Prefix,
    tx: Option<mpsc::UnboundedSender<CompletionEvent>>,
}

impl CompletionReply {
    pub(crate) fn new(
        lookup: LookupId,
        request: RequestId,
        prefix: Prefix,
        tx: mpsc::UnboundedSender<CompletionEvent>,
    ) -> Self {
        Self {
            lookup,
            request,
            prefix,
            tx: Some(tx),
        }
    }

    /// The prefix this request is completing
    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    /// Deliver one full hash found for the prefix
    pub fn completion(&self, hash: CompleteHash, table: impl Into<String>, chunk: u32) {
        if let Some(tx) = &self.tx {
            // worker gone means the lookup was already finalized
            let _ = tx.send(CompletionEvent::Completion {
                lookup: self.lookup,
                request: self.request,
                hash,
                table: table.into(),
                chunk,
            });
        }
    }

    /// Close the request
    pub fn finished(mut self, status: Result<(), CompletionError>) {
        self.send_finished(status);
    }

    fn send_finished(&mut self, status: Result<(), CompletionError>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(CompletionEvent::Finished {
                lookup: self.lookup,
                request: self.request,
                prefix: self.prefix,
                status,
            });
        }
    }
}

impl Drop for CompletionReply {
    fn drop(&mut self) {
        self.send_finished(Err(CompletionError::Dropped));
    }
}
