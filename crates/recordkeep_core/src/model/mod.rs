//! Domain model for versioned records.
//!
//! # Responsibility
//! - Define the persisted `Record` shape and its validation rules.
//! - Define the immutable `Resource` snapshot used for diffs and events.
//!
//! # Invariants
//! - Every record is identified by a stable, caller-assigned natural id.
//! - Deletion is a hard delete; there are no tombstones.

pub mod record;
pub mod resource;
