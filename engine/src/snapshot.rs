//! Snapshots of the in-memory local store.
//!
//! A snapshot is the full contents of a [`crate::MemoryStore`]. The store
//! uses snapshots as transaction savepoints, and they serialize to
//! deterministic JSON for fixtures and bootstrapping.

use crate::{error::Result, Entity, Error, LocalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the local store.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Next local id the store will hand out
    pub next_id: LocalId,
    /// Entities by type, then by local id
    pub tables: BTreeMap<String, BTreeMap<LocalId, Entity>>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_id: 1,
            tables: BTreeMap::new(),
        }
    }

    /// Add a persisted entity. Entities without a local id are rejected.
    pub fn add_entity(&mut self, entity: Entity) -> Result<()> {
        let id = entity
            .id
            .ok_or_else(|| Error::InvalidSnapshot(format!("{} without local id", entity.entity_type)))?;
        self.next_id = self.next_id.max(id + 1);
        self.tables
            .entry(entity.entity_type.clone())
            .or_default()
            .insert(id, entity);
        Ok(())
    }

    pub fn get_entity(&self, entity_type: &str, id: LocalId) -> Option<&Entity> {
        self.tables.get(entity_type)?.get(&id)
    }

    /// Count entities across all tables.
    pub fn entity_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Check internal consistency: table keys match entity type and id, and
    /// `next_id` is past every stored id.
    pub fn validate(&self) -> Result<()> {
        for (entity_type, table) in &self.tables {
            for (id, entity) in table {
                if entity.entity_type != *entity_type {
                    return Err(Error::InvalidSnapshot(format!(
                        "{} {} stored in table '{}'",
                        entity.entity_type, id, entity_type
                    )));
                }
                if entity.id != Some(*id) {
                    return Err(Error::InvalidSnapshot(format!(
                        "{entity_type} stored under id {id} has id {:?}",
                        entity.id
                    )));
                }
                if *id >= self.next_id {
                    return Err(Error::InvalidSnapshot(format!(
                        "next id {} is not past stored id {}",
                        self.next_id, id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        snapshot.validate()?;
        Ok(snapshot)
    }
}
