//! Local field values.
//!
//! A [`Value`] is the semantic, store-side representation of a business field.
//! Wire representations live in [`crate::codec`].

use crate::LocalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Reference to another entity.
///
/// A reference decoded from the remote side starts out as a stub carrying only
/// the remote id; `local_id` is filled in when the referenced entity is already
/// materialized locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// Local type of the referenced entity
    pub entity_type: String,
    /// Remote id of the referenced entity (empty if never synced)
    pub remote_id: String,
    /// Local primary key, when known
    pub local_id: Option<LocalId>,
}

impl EntityRef {
    /// A lazily-resolved stub carrying only the remote id.
    pub fn stub(entity_type: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            remote_id: remote_id.into(),
            local_id: None,
        }
    }

    /// Whether the reference points at a locally materialized entity.
    pub fn is_resolved(&self) -> bool {
        self.local_id.is_some()
    }

    /// Two references denote the same entity.
    ///
    /// Local ids win when both sides carry one; otherwise remote ids are
    /// compared.
    pub fn same_entity(&self, other: &EntityRef) -> bool {
        if self.entity_type != other.entity_type {
            return false;
        }
        match (self.local_id, other.local_id) {
            (Some(a), Some(b)) => a == b,
            _ => !self.remote_id.is_empty() && self.remote_id == other.remote_id,
        }
    }
}

/// A local field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Ref(EntityRef),
}

impl Value {
    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::String(_) => "String",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Bool",
            Value::DateTime(_) => "DateTime",
            Value::Ref(_) => "Ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Equality that treats references by identity rather than by every
    /// attribute, so a decoded stub matches the materialized entity.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Ref(a), Value::Ref(b)) => a.same_entity(b),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    /// Ordering between values of compatible types. Incomparable pairs
    /// (including anything involving `Null`) yield `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Ref(a), Value::Ref(b)) => Some(a.remote_id.cmp(&b.remote_id)),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<EntityRef> for Value {
    fn from(value: EntityRef) -> Self {
        Value::Ref(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from("a"), Value::String("a".into()));
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }

    #[test]
    fn refs_compare_by_identity() {
        let stub = Value::Ref(EntityRef::stub("organisation", "guid-1"));
        let resolved = Value::Ref(EntityRef {
            entity_type: "organisation".into(),
            remote_id: "guid-1".into(),
            local_id: Some(7),
        });
        assert!(stub.same_as(&resolved));
        assert_ne!(stub, resolved);

        let other = Value::Ref(EntityRef::stub("contact", "guid-1"));
        assert!(!stub.same_as(&other));
    }

    #[test]
    fn unsynced_stubs_never_match() {
        let a = EntityRef::stub("organisation", "");
        let b = EntityRef::stub("organisation", "");
        assert!(!a.same_entity(&b));
    }

    #[test]
    fn compare_mixed_numbers() {
        assert_eq!(
            Value::Int(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn serialization_roundtrip() {
        let value = Value::Ref(EntityRef::stub("organisation", "guid-1"));
        let json = serde_json::to_string(&value).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, parsed);
    }
}
