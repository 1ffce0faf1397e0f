//! Versioned record persistence with optimistic concurrency.
//! Aggregates diff their snapshots, upsert through a version-guarded store
//! and publish before/after change events to an explicit sink.

pub mod db;
pub mod domain;
pub mod error;
pub mod event;
pub mod logging;
pub mod model;
pub mod repo;
pub mod store;

pub use domain::aggregate::{Aggregate, AggregateFactory};
pub use error::{DomainError, DomainResult};
pub use event::{ChangeEvent, ChangeKind, EventSink, LoggingSink, OutboxSink, RecordingSink};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::{MutableRecord, Record, RecordId, RecordValidationError};
pub use model::resource::Resource;
pub use repo::record_repo::{RecordRepository, RepoError, RepoResult, SqliteRecordRepository};
pub use store::record_store::{RecordStore, Upserted};

/// Minimal health-check API for smoke wiring.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
