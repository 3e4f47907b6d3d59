//! Entities: the local records kept in sync with the remote system.

use crate::{EntityRef, LocalId, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved column names understood by local queries in addition to the
/// business fields.
pub const ID_COLUMN: &str = "id";
pub const REMOTE_ID_COLUMN: &str = "remote_id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const MODIFIED_AT_COLUMN: &str = "modified_at";

/// Where an entity instance stands relative to the two stores.
///
/// Staleness and conflicts are not stored; they are derived per operation
/// from a [`crate::SyncDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Not persisted locally
    Detached,
    /// Persisted locally, never pushed to the remote system
    LocalOnly,
    /// Persisted locally and known to the remote system
    Synced,
}

/// Timestamps and remote id reflecting the last known-synchronized state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStamps {
    pub remote_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl SyncStamps {
    /// Copy the stamps onto an entity instance.
    pub fn apply_to(&self, entity: &mut Entity) {
        entity.remote_id = self.remote_id.clone();
        entity.created_at = self.created_at;
        entity.modified_at = self.modified_at;
    }
}

/// A local record of some registered entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Store-assigned primary key; `None` until inserted
    pub id: Option<LocalId>,
    /// Registered entity type
    pub entity_type: String,
    /// Remote primary key; empty until the first remote create
    pub remote_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub modified_at: DateTime<Utc>,
    /// Business fields by local field name
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    /// Create a new, detached entity.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            id: None,
            entity_type: entity_type.into(),
            remote_id: String::new(),
            created_at: DateTime::<Utc>::MIN_UTC,
            modified_at: DateTime::<Utc>::MIN_UTC,
            fields: BTreeMap::new(),
        }
    }

    /// A stand-in for an object known only by its remote id.
    ///
    /// Its `modified_at` is maximally old, so any remote snapshot is newer and
    /// gets pulled in.
    pub fn placeholder(entity_type: impl Into<String>, remote_id: impl Into<String>) -> Self {
        let mut entity = Self::new(entity_type);
        entity.remote_id = remote_id.into();
        entity
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a business field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Get a business field, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a business field or one of the reserved columns.
    pub fn column(&self, name: &str) -> Option<Value> {
        match name {
            ID_COLUMN => Some(
                self.id
                    .and_then(|id| i64::try_from(id).ok())
                    .map_or(Value::Null, Value::Int),
            ),
            REMOTE_ID_COLUMN => Some(Value::String(self.remote_id.clone())),
            CREATED_AT_COLUMN => Some(Value::DateTime(self.created_at)),
            MODIFIED_AT_COLUMN => Some(Value::DateTime(self.modified_at)),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Whether the entity has ever been pushed to the remote system.
    pub fn is_synced(&self) -> bool {
        !self.remote_id.is_empty()
    }

    pub fn state(&self) -> EntityState {
        match (self.id, self.is_synced()) {
            (None, _) => EntityState::Detached,
            (Some(_), false) => EntityState::LocalOnly,
            (Some(_), true) => EntityState::Synced,
        }
    }

    /// A reference to this entity, for use in another entity's fields.
    pub fn to_ref(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type.clone(),
            remote_id: self.remote_id.clone(),
            local_id: self.id,
        }
    }

    /// The current sync stamps.
    pub fn stamps(&self) -> SyncStamps {
        SyncStamps {
            remote_id: self.remote_id.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}
