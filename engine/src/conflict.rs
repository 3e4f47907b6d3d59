//! Per-field conflict reports.

use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Both sides of a single conflicting field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Decoded remote value
    pub theirs: Value,
    /// Local value
    pub yours: Value,
}

/// Mapped fields whose local and remote values disagree, by local field name.
///
/// An empty report means there is no conflict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictReport {
    fields: BTreeMap<String, FieldConflict>,
}

impl ConflictReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mismatch.
    pub fn insert(&mut self, field: impl Into<String>, theirs: Value, yours: Value) {
        self.fields
            .insert(field.into(), FieldConflict { theirs, yours });
    }

    pub fn get(&self, field: &str) -> Option<&FieldConflict> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Conflicting field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldConflict)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}
