//! Immutable snapshot of a record's externally visible fields.

use crate::model::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Comparable snapshot used for change detection and event payloads.
///
/// Ordering compares `natural_id` first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    natural_id: String,
    parent_natural_id: Option<String>,
    value: Option<String>,
    children: BTreeSet<String>,
    version: i64,
}

impl Resource {
    pub fn new(
        natural_id: impl Into<String>,
        parent_natural_id: Option<String>,
        value: Option<String>,
        children: BTreeSet<String>,
        version: i64,
    ) -> Self {
        Self {
            natural_id: natural_id.into(),
            parent_natural_id,
            value,
            children,
            version,
        }
    }

    pub fn natural_id(&self) -> &str {
        &self.natural_id
    }

    pub fn parent_natural_id(&self) -> Option<&str> {
        self.parent_natural_id.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn children(&self) -> &BTreeSet<String> {
        &self.children
    }

    pub fn version(&self) -> i64 {
        self.version
    }
}

impl From<&Record> for Resource {
    fn from(record: &Record) -> Self {
        Self {
            natural_id: record.natural_id.clone(),
            parent_natural_id: record.parent_natural_id.clone(),
            value: record.value.clone(),
            children: record.children.clone(),
            version: record.version,
        }
    }
}
