//! Storage collaborator contracts and SQLite implementations.
//!
//! # Responsibility
//! - Define the storage contract the record store adapter depends on.
//! - Isolate SQLite query details from domain orchestration.
//!
//! # Invariants
//! - Writes enforce `Record::validate()` before persistence.
//! - Version mismatches are reported as `VersionConflict`, distinct from
//!   `NotFound` and transport errors.

pub mod record_repo;
