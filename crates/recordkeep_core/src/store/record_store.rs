//! Record store adapter: insert-vs-update branching over the storage contract.
//!
//! # Responsibility
//! - Decide between insert, versioned update and no-op for each upsert.
//! - Translate storage outcomes into `DomainError` kinds.
//!
//! # Invariants
//! - Records without a surrogate id are always inserted at version 1.
//! - An unchanged snapshot never reaches storage.
//! - Version conflicts are surfaced, never retried.

use crate::error::DomainResult;
use crate::model::record::Record;
use crate::model::resource::Resource;
use crate::repo::record_repo::{RecordRepository, RepoError};
use log::{debug, warn};
use std::time::Instant;

/// Result of a write that may or may not have touched storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted<T> {
    pub value: T,
    /// `true` when storage accepted a write.
    pub changed: bool,
}

impl<T> Upserted<T> {
    pub fn changed(value: T) -> Self {
        Self {
            value,
            changed: true,
        }
    }

    pub fn unchanged(value: T) -> Self {
        Self {
            value,
            changed: false,
        }
    }
}

/// Adapter between aggregates and a `RecordRepository`.
pub struct RecordStore<R: RecordRepository> {
    repo: R,
}

impl<R: RecordRepository> RecordStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Looks a record up by natural key. No side effects.
    pub fn find_existing(&self, natural_id: &str) -> DomainResult<Option<Record>> {
        Ok(self.repo.find_by_natural_id(natural_id)?)
    }

    /// Returns the stored record or a fresh, unsaved one. Never writes.
    pub fn find_existing_or_create_new(&self, natural_id: &str) -> DomainResult<Record> {
        Ok(self
            .find_existing(natural_id)?
            .unwrap_or_else(|| Record::new(natural_id)))
    }

    /// Lists records currently assigned to `parent_natural_id`.
    pub fn find_owned(&self, parent_natural_id: &str) -> DomainResult<Vec<Record>> {
        Ok(self.repo.find_by_parent_natural_id(parent_natural_id)?)
    }

    pub fn all(&self) -> DomainResult<Vec<Record>> {
        Ok(self.repo.list_records()?)
    }

    /// Inserts, updates or skips `record`.
    ///
    /// `last_persisted` is the snapshot the caller last read from storage;
    /// when it equals the current snapshot nothing is written.
    ///
    /// # Errors
    /// - `ValidationFailure` for malformed records.
    /// - `ConcurrencyConflict` when the stored version moved on.
    /// - `NotFound` when a persisted record vanished before the update.
    pub fn upsert(
        &self,
        record: &Record,
        last_persisted: Option<&Resource>,
    ) -> DomainResult<Upserted<Record>> {
        let started_at = Instant::now();

        if !record.is_persisted() {
            let stored = self
                .repo
                .insert_record(record)
                .inspect_err(|err| log_write_failure("insert", record, err))?;
            debug!(
                "event=record_upsert module=store status=ok op=insert natural_id={} version={} duration_ms={}",
                stored.natural_id,
                stored.version,
                started_at.elapsed().as_millis()
            );
            return Ok(Upserted::changed(stored));
        }

        if last_persisted == Some(&Resource::from(record)) {
            debug!(
                "event=record_upsert module=store status=noop natural_id={} version={}",
                record.natural_id, record.version
            );
            return Ok(Upserted::unchanged(record.clone()));
        }

        let stored = self
            .repo
            .update_record_if_version(record, record.version)
            .inspect_err(|err| log_write_failure("update", record, err))?;
        debug!(
            "event=record_upsert module=store status=ok op=update natural_id={} version={} duration_ms={}",
            stored.natural_id,
            stored.version,
            started_at.elapsed().as_millis()
        );
        Ok(Upserted::changed(stored))
    }

    /// Deletes the row for `natural_id`.
    ///
    /// # Errors
    /// - `NotFound` when no row exists.
    pub fn remove(&self, natural_id: &str) -> DomainResult<()> {
        self.repo.delete_by_natural_id(natural_id)?;
        debug!("event=record_remove module=store status=ok natural_id={natural_id}");
        Ok(())
    }
}

fn log_write_failure(op: &str, record: &Record, err: &RepoError) {
    match err {
        RepoError::VersionConflict {
            expected, actual, ..
        } => warn!(
            "event=record_upsert module=store status=conflict op={op} natural_id={} expected_version={expected} actual_version={actual}",
            record.natural_id
        ),
        other => warn!(
            "event=record_upsert module=store status=error op={op} natural_id={} error={other}",
            record.natural_id
        ),
    }
}
