//! Record store adapter layer.
//!
//! Sits between domain aggregates and the storage contract; owns the
//! insert/update/no-op decision of every save.

pub mod record_store;
