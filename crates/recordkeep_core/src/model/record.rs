//! Record domain model.
//!
//! # Responsibility
//! - Define the persisted row shape shared by storage and aggregates.
//! - Provide write-time validation and a restricted mutation view.
//!
//! # Invariants
//! - `natural_id` is non-empty and never changes after construction.
//! - `id` is `None` until the first successful insert.
//! - `version` starts at 0 and is advanced only by storage writes.
//! - `children` is a `BTreeSet`, so iteration order is always sorted.

use std::collections::BTreeSet;
use thiserror::Error;

/// Storage-assigned surrogate identifier.
pub type RecordId = i64;

/// Persisted state of one aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Surrogate id, assigned by storage on first insert.
    pub id: Option<RecordId>,
    /// Caller-assigned unique key.
    pub natural_id: String,
    /// Natural id of the owning record, if assigned.
    pub parent_natural_id: Option<String>,
    /// Free-form payload.
    pub value: Option<String>,
    /// Natural ids of owned records.
    pub children: BTreeSet<String>,
    /// Optimistic concurrency counter. 0 means never persisted.
    pub version: i64,
}

/// Validation failures for record writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordValidationError {
    #[error("natural id must not be empty")]
    EmptyNaturalId,
    #[error("parent natural id must not be empty")]
    EmptyParentNaturalId,
    #[error("record `{0}` cannot be its own parent")]
    SelfParent(String),
    #[error("child natural id must not be empty")]
    EmptyChildNaturalId,
    #[error("record `{0}` cannot be its own child")]
    SelfChild(String),
    #[error("version must not be negative, got {0}")]
    NegativeVersion(i64),
}

impl Record {
    /// Creates an unsaved record with version 0 and no surrogate id.
    pub fn new(natural_id: impl Into<String>) -> Self {
        Self {
            id: None,
            natural_id: natural_id.into(),
            parent_natural_id: None,
            value: None,
            children: BTreeSet::new(),
            version: 0,
        }
    }

    /// Returns whether storage has assigned a surrogate id.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Checks write-time invariants.
    ///
    /// # Errors
    /// - Empty natural, parent or child ids.
    /// - Self references through parent or children.
    /// - Negative version.
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.natural_id.trim().is_empty() {
            return Err(RecordValidationError::EmptyNaturalId);
        }

        if let Some(parent) = self.parent_natural_id.as_deref() {
            if parent.trim().is_empty() {
                return Err(RecordValidationError::EmptyParentNaturalId);
            }
            if parent == self.natural_id {
                return Err(RecordValidationError::SelfParent(self.natural_id.clone()));
            }
        }

        for child in &self.children {
            if child.trim().is_empty() {
                return Err(RecordValidationError::EmptyChildNaturalId);
            }
            if *child == self.natural_id {
                return Err(RecordValidationError::SelfChild(self.natural_id.clone()));
            }
        }

        if self.version < 0 {
            return Err(RecordValidationError::NegativeVersion(self.version));
        }

        Ok(())
    }
}

/// Mutation view handed to aggregate update callbacks.
///
/// Exposes only caller-owned fields; identity and version stay read-only.
/// Relationship setters are crate-private so both sides always move together.
pub struct MutableRecord<'a> {
    record: &'a mut Record,
}

impl<'a> MutableRecord<'a> {
    pub(crate) fn new(record: &'a mut Record) -> Self {
        Self { record }
    }

    pub fn natural_id(&self) -> &str {
        &self.record.natural_id
    }

    pub fn value(&self) -> Option<&str> {
        self.record.value.as_deref()
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.record.value = Some(value.into());
    }

    pub fn clear_value(&mut self) {
        self.record.value = None;
    }

    pub fn parent_natural_id(&self) -> Option<&str> {
        self.record.parent_natural_id.as_deref()
    }

    /// Points this record at its parent by natural key.
    pub(crate) fn assign_to(&mut self, parent_natural_id: impl Into<String>) {
        self.record.parent_natural_id = Some(parent_natural_id.into());
    }

    /// Clears the parent reference, whichever parent it was.
    pub(crate) fn unassign_from_any(&mut self) {
        self.record.parent_natural_id = None;
    }

    pub fn children(&self) -> &BTreeSet<String> {
        &self.record.children
    }

    /// Returns `true` when the child was not present before.
    pub(crate) fn add_child(&mut self, child_natural_id: impl Into<String>) -> bool {
        self.record.children.insert(child_natural_id.into())
    }

    /// Returns `true` when the child was present.
    pub(crate) fn remove_child(&mut self, child_natural_id: &str) -> bool {
        self.record.children.remove(child_natural_id)
    }
}
