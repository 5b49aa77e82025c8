//! sbdb: local URL reputation database
//!
//! Facade over the workspace crates:
//!
//! - [`core`]: prefix stores, update application and lookups
//! - [`updater`]: streaming update-protocol parser
//! - [`service`]: worker thread, hash completion and the public handle

pub use sbdb_core as core;
pub use sbdb_service as service;
pub use sbdb_updater as updater;

pub use sbdb_core::{ClassifierConfig, LookupKey};
pub use sbdb_service::{Classification, DbService, HashCompleter, ServiceBuilder, UpdateObserver};
