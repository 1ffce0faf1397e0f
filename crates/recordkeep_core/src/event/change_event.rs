//! Before/after change events emitted after successful writes.

use crate::model::resource::Resource;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind of persistence mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(text)
    }
}

/// Immutable `(before, after)` snapshot pair.
///
/// At least one side is always present; the variants make the empty pair
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Created { after: Resource },
    Updated { before: Resource, after: Resource },
    Deleted { before: Resource },
}

impl ChangeEvent {
    pub fn created(after: Resource) -> Self {
        Self::Created { after }
    }

    pub fn updated(before: Resource, after: Resource) -> Self {
        Self::Updated { before, after }
    }

    pub fn deleted(before: Resource) -> Self {
        Self::Deleted { before }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Created { .. } => ChangeKind::Created,
            Self::Updated { .. } => ChangeKind::Updated,
            Self::Deleted { .. } => ChangeKind::Deleted,
        }
    }

    pub fn before(&self) -> Option<&Resource> {
        match self {
            Self::Created { .. } => None,
            Self::Updated { before, .. } | Self::Deleted { before } => Some(before),
        }
    }

    pub fn after(&self) -> Option<&Resource> {
        match self {
            Self::Created { after } | Self::Updated { after, .. } => Some(after),
            Self::Deleted { .. } => None,
        }
    }

    /// Natural id of the record the event is about.
    pub fn natural_id(&self) -> &str {
        match self {
            Self::Created { after } | Self::Updated { after, .. } => after.natural_id(),
            Self::Deleted { before } => before.natural_id(),
        }
    }
}
