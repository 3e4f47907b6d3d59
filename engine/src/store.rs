//! The local store seam and its in-memory implementation.
//!
//! The orchestrator consumes the local store through [`LocalStore`]: plain
//! CRUD keyed by a store-assigned [`LocalId`], a query entry point, and
//! nestable transactions. [`MemoryStore`] implements transactions as a stack
//! of savepoint snapshots.

use crate::{
    entity::SyncStamps, error::Result, query::LocalQuery, snapshot::StoreSnapshot, Entity, Error,
    LocalId, Predicate,
};
use std::collections::BTreeMap;
use tracing::trace;

/// Local relational store consumed by the orchestrator.
pub trait LocalStore {
    /// Open a (possibly nested) transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the innermost transaction.
    fn commit(&mut self) -> Result<()>;

    /// Discard every write since the innermost `begin`.
    fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Insert a detached entity and return its new local id.
    fn insert(&mut self, entity: &Entity) -> Result<LocalId>;

    fn get(&self, entity_type: &str, id: LocalId) -> Result<Option<Entity>>;

    /// Overwrite a persisted entity, stamps included.
    fn update(&mut self, entity: &Entity) -> Result<()>;

    /// Overwrite only the sync stamps of a persisted entity.
    fn set_stamps(&mut self, entity_type: &str, id: LocalId, stamps: &SyncStamps) -> Result<()>;

    /// Returns whether a row was removed.
    fn delete(&mut self, entity_type: &str, id: LocalId) -> Result<bool>;

    /// Rows matching a local query, in query order.
    fn filter(&self, query: &LocalQuery) -> Result<Vec<Entity>>;

    fn find_by_remote_id(&self, entity_type: &str, remote_id: &str) -> Result<Option<Entity>> {
        if remote_id.is_empty() {
            return Ok(None);
        }
        let query = LocalQuery::new(entity_type)
            .filter(Predicate::eq(crate::entity::REMOTE_ID_COLUMN, remote_id))
            .limit(1);
        Ok(self.filter(&query)?.into_iter().next())
    }

    fn count(&self, entity_type: &str) -> Result<usize> {
        Ok(self.filter(&LocalQuery::new(entity_type))?.len())
    }
}

/// An in-memory local store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: BTreeMap<String, BTreeMap<LocalId, Entity>>,
    next_id: LocalId,
    savepoints: Vec<StoreSnapshot>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            next_id: 1,
            savepoints: Vec::new(),
        }
    }

    /// Current transaction nesting depth.
    pub fn depth(&self) -> usize {
        self.savepoints.len()
    }

    /// Every stored entity of a type, by local id.
    pub fn all(&self, entity_type: &str) -> Vec<Entity> {
        self.tables
            .get(entity_type)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Export the current contents as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        StoreSnapshot {
            next_id: self.next_id,
            tables: self.tables.clone(),
            ..StoreSnapshot::new()
        }
    }

    /// Replace the contents with a snapshot.
    ///
    /// Not allowed inside a transaction.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        if self.in_transaction() {
            return Err(Error::Transaction(
                "cannot import a snapshot inside a transaction".into(),
            ));
        }
        snapshot.validate()?;
        self.restore(snapshot);
        Ok(())
    }

    fn restore(&mut self, snapshot: StoreSnapshot) {
        self.tables = snapshot.tables;
        self.next_id = snapshot.next_id;
    }

    fn row_mut(&mut self, entity_type: &str, id: LocalId) -> Result<&mut Entity> {
        self.tables
            .get_mut(entity_type)
            .and_then(|t| t.get_mut(&id))
            .ok_or_else(|| Error::not_found(entity_type, id))
    }
}

impl LocalStore for MemoryStore {
    fn begin(&mut self) -> Result<()> {
        let savepoint = self.export_state();
        self.savepoints.push(savepoint);
        trace!(depth = self.savepoints.len(), "begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.savepoints
            .pop()
            .map(|_| trace!(depth = self.savepoints.len(), "commit"))
            .ok_or_else(|| Error::Transaction("commit without an open transaction".into()))
    }

    fn rollback(&mut self) -> Result<()> {
        let savepoint = self
            .savepoints
            .pop()
            .ok_or_else(|| Error::Transaction("rollback without an open transaction".into()))?;
        self.restore(savepoint);
        trace!(depth = self.savepoints.len(), "rollback");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.savepoints.is_empty()
    }

    fn insert(&mut self, entity: &Entity) -> Result<LocalId> {
        if let Some(id) = entity.id {
            return Err(Error::AlreadyPersisted(id));
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut row = entity.clone();
        row.id = Some(id);
        self.tables
            .entry(entity.entity_type.clone())
            .or_default()
            .insert(id, row);
        Ok(id)
    }

    fn get(&self, entity_type: &str, id: LocalId) -> Result<Option<Entity>> {
        Ok(self
            .tables
            .get(entity_type)
            .and_then(|t| t.get(&id))
            .cloned())
    }

    fn update(&mut self, entity: &Entity) -> Result<()> {
        let id = entity
            .id
            .ok_or_else(|| Error::NotPersisted(entity.entity_type.clone()))?;
        let row = self.row_mut(&entity.entity_type, id)?;
        *row = entity.clone();
        Ok(())
    }

    fn set_stamps(&mut self, entity_type: &str, id: LocalId, stamps: &SyncStamps) -> Result<()> {
        let row = self.row_mut(entity_type, id)?;
        stamps.apply_to(row);
        Ok(())
    }

    fn delete(&mut self, entity_type: &str, id: LocalId) -> Result<bool> {
        Ok(self
            .tables
            .get_mut(entity_type)
            .and_then(|t| t.remove(&id))
            .is_some())
    }

    fn filter(&self, query: &LocalQuery) -> Result<Vec<Entity>> {
        let mut rows: Vec<Entity> = self
            .tables
            .get(&query.entity_type)
            .map(|t| t.values().filter(|e| query.matches(e)).cloned().collect())
            .unwrap_or_default();
        query.arrange(&mut rows);
        Ok(rows)
    }

    fn count(&self, entity_type: &str) -> Result<usize> {
        Ok(self.tables.get(entity_type).map_or(0, BTreeMap::len))
    }
}
