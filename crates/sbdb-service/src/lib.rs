//! sbdb-service: the classification worker and its public handle
//!
//! All store access happens on one dedicated worker thread. Callers hold a
//! [`DbService`] and talk to the worker through a bounded command queue;
//! lookups are answered through handlers, update sessions through an
//! [`UpdateObserver`].
//!
//! ```text
//! caller threads            worker thread
//! ──────────────            ─────────────
//! lookup() ──queue──┐
//!                   └─────▶ check stores ─▶ completion requests ──▶ HashCompleter
//!                                                                       │
//! handler(tables) ◀──────── verdict ◀── CompletionReply events ◀────────┘
//! ```

mod completer;
mod error;
mod lookup;
pub mod metrics;
mod miss_cache;
mod service;
mod update;
mod worker;

pub use completer::{CompletionReply, HashCompleter};
pub use error::{CompletionError, Result, ServiceError};
pub use lookup::{Classification, LookupHandler, LookupOutcome, LookupQueue, PendingLookup};
pub use miss_cache::MissCache;
pub use service::{DbService, ServiceBuilder};
pub use update::{UpdateObserver, UpdatePipeline};
pub use worker::ServiceState;
