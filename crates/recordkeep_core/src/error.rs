//! Domain-level error contract.
//!
//! # Responsibility
//! - Give callers one discriminable error per failure kind.
//! - Translate storage outcomes into domain terms.
//!
//! # Invariants
//! - A version mismatch is always `ConcurrencyConflict`, never a success.
//! - Every error is scoped to the call that raised it.

use crate::model::record::RecordValidationError;
use crate::repo::record_repo::RepoError;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error)]
pub enum DomainError {
    /// Lookup or delete on an absent natural id.
    #[error("record not found: {0}")]
    NotFound(String),
    /// Stored version differed from the version the caller last read.
    #[error("concurrency conflict on `{natural_id}`: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        natural_id: String,
        expected: i64,
        actual: i64,
    },
    /// Use after delete, double delete, or invalid construction input.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Malformed record rejected before any write.
    #[error("validation failure: {0}")]
    ValidationFailure(#[from] RecordValidationError),
    /// Transport or schema failure below the domain.
    #[error("storage failure: {0}")]
    Storage(#[source] RepoError),
}

impl From<RepoError> for DomainError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(natural_id) => Self::NotFound(natural_id),
            RepoError::VersionConflict {
                natural_id,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                natural_id,
                expected,
                actual,
            },
            RepoError::Validation(err) => Self::ValidationFailure(err),
            other => Self::Storage(other),
        }
    }
}
