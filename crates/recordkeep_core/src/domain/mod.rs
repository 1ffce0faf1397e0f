//! Domain aggregates and their factory.
//!
//! # Responsibility
//! - Wrap persisted records in identity-bearing aggregates.
//! - Publish change events through an explicitly supplied sink.

pub mod aggregate;
