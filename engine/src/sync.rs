//! The sync orchestrator.
//!
//! [`Synchronizer`] owns a local store and a remote API handle and runs
//! every entity operation against both, following one rule per operation:
//!
//! - **create**: local insert, then remote create, in one transaction. The
//!   remote id and stamps are written back before commit.
//! - **get**: refresh from the remote snapshot when the remote copy is newer
//!   than the local one by more than the sync delta.
//! - **filter**: translate the predicate, list remotely, refresh every listed
//!   object (one remote get each) in one local transaction, then run the
//!   query locally. A failed refresh rolls back every row pulled before it.
//! - **update**: fetch the remote snapshot first; a newer remote copy is a
//!   conflict and nothing is written. Otherwise local update, then remote
//!   update, in one transaction.
//! - **delete**: local delete, then remote delete, in one transaction.
//!
//! Every call takes a [`SyncMode`]. [`SyncMode::Skip`] touches the local
//! store only and makes no remote calls at all.

use crate::{
    clock::{Clock, SystemClock},
    config::SyncConfig,
    conflict::ConflictReport,
    decision::{optional_timestamp, SyncDecision},
    entity::SyncStamps,
    error::Result,
    mapping::{FieldMapping, KnownRelated},
    query::{LocalQuery, Predicate, Query},
    remote::{RemoteApi, RemoteSnapshot, CREATED_ON, MODIFIED_ON},
    store::LocalStore,
    transaction::{atomic, run},
    Entity, EntityRef, Error, LocalId, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Whether an operation talks to the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Local store and remote system
    #[default]
    Sync,
    /// Local store only
    Skip,
}

impl SyncMode {
    pub fn is_skip(self) -> bool {
        self == SyncMode::Skip
    }
}

/// Runs entity operations against the local store and the remote system.
#[derive(Debug)]
pub struct Synchronizer<S, R> {
    store: S,
    remote: R,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
}

impl<S: LocalStore, R: RemoteApi> Synchronizer<S, R> {
    pub fn new(store: S, remote: R, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp local writes from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct store access, bypassing the sync layer.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, R) {
        (self.store, self.remote)
    }

    fn check_type<M: FieldMapping>(entity: &Entity) -> Result<()> {
        if entity.entity_type != M::MAPPING.entity_type {
            return Err(Error::EntityTypeMismatch {
                expected: M::MAPPING.entity_type.to_string(),
                got: entity.entity_type.clone(),
            });
        }
        Ok(())
    }

    fn remote_id_of(entity: &Entity) -> Result<String> {
        if entity.remote_id.is_empty() {
            return Err(Error::MissingRemoteId(format!(
                "{} {}",
                entity.entity_type,
                entity.id.map_or_else(|| "(unsaved)".to_string(), |id| id.to_string())
            )));
        }
        Ok(entity.remote_id.clone())
    }

    /// Persist a new entity.
    ///
    /// On success `entity` carries its local id, stamps and, in sync mode,
    /// its remote id. On failure neither store nor `entity` is changed.
    pub fn create<M: FieldMapping>(&mut self, entity: &mut Entity, mode: SyncMode) -> Result<()> {
        Self::check_type::<M>(entity)?;
        if let Some(id) = entity.id {
            return Err(Error::AlreadyPersisted(id));
        }

        let entity_type = M::MAPPING.entity_type;
        let now = self.clock.now();
        let mut row = entity.clone();
        row.created_at = now;
        row.modified_at = now;

        if mode.is_skip() {
            let id = self.store.insert(&row)?;
            row.id = Some(id);
            debug!(entity_type, id, "created locally");
            *entity = row;
            return Ok(());
        }

        let service = M::MAPPING.service;
        let payload = M::remote_payload(&row, RemoteSnapshot::new())?;

        let (id, stamps) = run(
            &mut self.store,
            &self.remote,
            |store| store.insert(&row),
            |remote, store, id| {
                let created = remote.create(service, &payload)?;
                let stamps = SyncStamps {
                    remote_id: M::MAPPING.get_remote_id(&created)?,
                    created_at: optional_timestamp(&created, CREATED_ON)?.unwrap_or(now),
                    modified_at: optional_timestamp(&created, MODIFIED_ON)?.unwrap_or(now),
                };
                store.set_stamps(entity_type, id, &stamps)?;
                Ok((id, stamps))
            },
        )?;

        row.id = Some(id);
        stamps.apply_to(&mut row);
        info!(entity_type, id, remote_id = %row.remote_id, "created");
        *entity = row;
        Ok(())
    }

    /// Create or update, depending on whether `entity` is persisted.
    pub fn save<M: FieldMapping>(&mut self, entity: &mut Entity, mode: SyncMode) -> Result<()> {
        match entity.id {
            None => self.create::<M>(entity, mode),
            Some(_) => self.update::<M>(entity, mode),
        }
    }

    /// Fetch by local id, refreshing from the remote copy when it is newer.
    pub fn get<M: FieldMapping>(&mut self, id: LocalId, mode: SyncMode) -> Result<Entity> {
        let entity_type = M::MAPPING.entity_type;
        let local = self
            .store
            .get(entity_type, id)?
            .ok_or_else(|| Error::not_found(entity_type, id))?;

        if mode.is_skip() || !local.is_synced() {
            return Ok(local);
        }
        let remote_id = local.remote_id.clone();
        self.refresh::<M>(Some(local), &remote_id, &KnownRelated::new())
    }

    /// Fetch by remote id.
    ///
    /// An object that only exists remotely is pulled into the local store.
    /// If neither side has it, the result is [`Error::NotFound`] and nothing
    /// is written.
    pub fn get_by_remote_id<M: FieldMapping>(
        &mut self,
        remote_id: &str,
        mode: SyncMode,
    ) -> Result<Entity> {
        let entity_type = M::MAPPING.entity_type;
        if remote_id.is_empty() {
            return Err(Error::not_found(entity_type, "empty remote id"));
        }
        let local = self.store.find_by_remote_id(entity_type, remote_id)?;

        if mode.is_skip() {
            return local.ok_or_else(|| Error::not_found(entity_type, remote_id));
        }

        let known_locally = local.is_some();
        match self.refresh::<M>(local, remote_id, &KnownRelated::new()) {
            Err(err) if !known_locally && err.is_remote_not_found() => {
                Err(Error::not_found(entity_type, remote_id))
            }
            result => result,
        }
    }

    /// Fetch the single local row matching `predicate`, then refresh it.
    ///
    /// Zero or several matches fail before any remote call.
    pub fn find<M: FieldMapping>(&mut self, predicate: Predicate, mode: SyncMode) -> Result<Entity> {
        let entity_type = M::MAPPING.entity_type;
        let mut rows = self
            .store
            .filter(&LocalQuery::new(entity_type).filter(predicate))?;

        let local = match rows.len() {
            0 => return Err(Error::not_found(entity_type, "matching query")),
            1 => rows.remove(0),
            count => {
                return Err(Error::MultipleObjectsReturned {
                    entity_type: entity_type.to_string(),
                    count,
                })
            }
        };

        if mode.is_skip() || !local.is_synced() {
            return Ok(local);
        }
        let remote_id = local.remote_id.clone();
        self.refresh::<M>(Some(local), &remote_id, &KnownRelated::new())
    }

    /// Run a synced query.
    ///
    /// In sync mode this costs one remote list plus one remote get per listed
    /// object.
    pub fn filter<M: FieldMapping>(&mut self, query: &Query, mode: SyncMode) -> Result<Vec<Entity>> {
        let entity_type = M::MAPPING.entity_type;
        let local_query = query.to_local(entity_type);

        if mode.is_skip() {
            return self.store.filter(&local_query);
        }

        let filters = query.remote_filters(&M::MAPPING)?;
        let listed = self.remote.list(M::MAPPING.service, &filters)?;
        debug!(entity_type, ?filters, count = listed.len(), "listed remotely");

        self.store.begin()?;
        if let Err(err) = self.refresh_listed::<M>(&listed, query.known_related()) {
            warn!(entity_type, error = %err, "list refresh failed, rolling back");
            if let Err(rollback_err) = self.store.rollback() {
                warn!(error = %rollback_err, "rollback failed");
            }
            return Err(err);
        }
        self.store.commit()?;

        self.store.filter(&local_query)
    }

    /// Refresh every listed object. Runs inside the caller's transaction.
    fn refresh_listed<M: FieldMapping>(
        &mut self,
        listed: &[RemoteSnapshot],
        known: &KnownRelated,
    ) -> Result<()> {
        let entity_type = M::MAPPING.entity_type;
        for snapshot in listed {
            let remote_id = M::MAPPING.get_remote_id(snapshot)?;
            let local = self.store.find_by_remote_id(entity_type, &remote_id)?;
            self.refresh::<M>(local, &remote_id, known)?;
        }
        Ok(())
    }

    /// Run a bypass query.
    ///
    /// In skip mode the full local query surface is available. In sync mode
    /// only what [`Query`] can express is accepted; ordering, limits and
    /// exclusions are rejected.
    pub fn select<M: FieldMapping>(
        &mut self,
        query: &LocalQuery,
        mode: SyncMode,
    ) -> Result<Vec<Entity>> {
        if query.entity_type != M::MAPPING.entity_type {
            return Err(Error::EntityTypeMismatch {
                expected: M::MAPPING.entity_type.to_string(),
                got: query.entity_type.clone(),
            });
        }
        if mode.is_skip() {
            return self.store.filter(query);
        }

        if query.is_ordered() {
            return Err(Error::unsupported("ordering on a synced query"));
        }
        if query.limit.is_some() {
            return Err(Error::unsupported("limit on a synced query"));
        }
        if !query.excludes.is_empty() {
            return Err(Error::unsupported("exclude on a synced query"));
        }

        let synced = if query.predicate.is_all() {
            Query::all()
        } else {
            Query::filtered(query.predicate.clone())?
        };
        self.filter::<M>(&synced, mode)
    }

    /// Children of `parent` referencing it through `field` of type `C`.
    ///
    /// The children decode their reference to `parent` itself rather than
    /// to a stub.
    pub fn children_of<C: FieldMapping>(
        &mut self,
        parent: &Entity,
        field: &str,
        mode: SyncMode,
    ) -> Result<Vec<Entity>> {
        let spec = C::MAPPING.get_remote_field(field)?;
        if !spec.codec.is_reference() {
            return Err(Error::unsupported(format!(
                "'{field}' is not a reference field"
            )));
        }

        let parent_ref = parent.to_ref();
        let query = Query::filtered(Predicate::eq(field, parent_ref.clone()))?
            .with_known_related(field, parent_ref);
        self.filter::<C>(&query, mode)
    }

    /// Materialize the entity a reference points at.
    pub fn resolve<M: FieldMapping>(
        &mut self,
        reference: &EntityRef,
        mode: SyncMode,
    ) -> Result<Entity> {
        if reference.entity_type != M::MAPPING.entity_type {
            return Err(Error::EntityTypeMismatch {
                expected: M::MAPPING.entity_type.to_string(),
                got: reference.entity_type.clone(),
            });
        }
        match reference.local_id {
            Some(id) => self.get::<M>(id, mode),
            None => self.get_by_remote_id::<M>(&reference.remote_id, mode),
        }
    }

    /// Reconcile one object against its remote snapshot.
    ///
    /// Without a local copy a placeholder stands in, so any remote object is
    /// newer and gets pulled. The pulled fields and the stamps are written
    /// in separate steps of one local transaction, with no remote write.
    fn refresh<M: FieldMapping>(
        &mut self,
        local: Option<Entity>,
        remote_id: &str,
        known: &KnownRelated,
    ) -> Result<Entity> {
        let entity_type = M::MAPPING.entity_type;
        let mut entity = local.unwrap_or_else(|| Entity::placeholder(entity_type, remote_id));

        let snapshot = self.remote.get(M::MAPPING.service, remote_id)?;
        let decision =
            SyncDecision::from_snapshot(entity.modified_at, &snapshot, self.config.sync_delta)?;
        debug!(
            entity_type,
            remote_id,
            changed = decision.changed,
            "sync decision"
        );

        if !decision.changed {
            return Ok(entity);
        }

        M::MAPPING.apply_snapshot(&mut entity, &snapshot, known)?;
        let stamps = SyncStamps {
            remote_id: remote_id.to_string(),
            created_at: decision.remote_created_at,
            modified_at: decision.remote_modified_at,
        };

        let id = atomic(&mut self.store, |store| {
            let id = match entity.id {
                Some(id) => {
                    store.update(&entity)?;
                    id
                }
                None => store.insert(&entity)?,
            };
            store.set_stamps(entity_type, id, &stamps)?;
            Ok(id)
        })?;

        entity.id = Some(id);
        stamps.apply_to(&mut entity);
        info!(entity_type, id, remote_id, "pulled remote changes");
        Ok(entity)
    }

    /// Persist changes to an existing entity.
    ///
    /// In sync mode the remote snapshot is fetched first. If it is newer
    /// than the stored copy the update is refused with
    /// [`Error::SyncConflict`] and nothing is written on either side.
    pub fn update<M: FieldMapping>(&mut self, entity: &mut Entity, mode: SyncMode) -> Result<()> {
        Self::check_type::<M>(entity)?;
        let entity_type = M::MAPPING.entity_type;
        let id = entity
            .id
            .ok_or_else(|| Error::NotPersisted(entity_type.to_string()))?;
        let now = self.clock.now();

        if mode.is_skip() {
            let mut row = entity.clone();
            row.modified_at = now;
            self.store.update(&row)?;
            debug!(entity_type, id, "updated locally");
            *entity = row;
            return Ok(());
        }

        let remote_id = Self::remote_id_of(entity)?;
        let stored = self
            .store
            .get(entity_type, id)?
            .ok_or_else(|| Error::not_found(entity_type, id))?;

        let service = M::MAPPING.service;
        let snapshot = self.remote.get(service, &remote_id)?;
        let decision =
            SyncDecision::from_snapshot(stored.modified_at, &snapshot, self.config.sync_delta)?;

        if decision.changed {
            let report = M::MAPPING.conflicting_fields(entity, &snapshot, &KnownRelated::new())?;
            warn!(
                entity_type,
                id,
                remote_id = %remote_id,
                fields = ?report.field_names().collect::<Vec<_>>(),
                "remote copy changed since last sync"
            );
            return Err(Error::SyncConflict(report));
        }

        let payload = M::remote_payload(entity, snapshot)?;
        let mut row = entity.clone();
        row.modified_at = now;

        let stamps = run(
            &mut self.store,
            &self.remote,
            |store| store.update(&row),
            |remote, store, ()| {
                let response = remote.update(service, &remote_id, &payload)?;
                // A response that only echoes the sent payload carries the
                // old stamp; the write happened now.
                let modified_at = match optional_timestamp(&response, MODIFIED_ON)? {
                    Some(at) if at > decision.remote_modified_at => at,
                    _ => now,
                };
                let stamps = SyncStamps {
                    remote_id: remote_id.clone(),
                    created_at: decision.remote_created_at,
                    modified_at,
                };
                store.set_stamps(entity_type, id, &stamps)?;
                Ok(stamps)
            },
        )?;

        stamps.apply_to(&mut row);
        info!(entity_type, id, remote_id = %row.remote_id, "updated");
        *entity = row;
        Ok(())
    }

    /// Delete an entity locally and, in sync mode, remotely.
    ///
    /// On success `entity` is detached again.
    pub fn delete<M: FieldMapping>(&mut self, entity: &mut Entity, mode: SyncMode) -> Result<()> {
        Self::check_type::<M>(entity)?;
        let entity_type = M::MAPPING.entity_type;
        let id = entity
            .id
            .ok_or_else(|| Error::NotPersisted(entity_type.to_string()))?;

        let delete_local = |store: &mut S| -> Result<()> {
            if store.delete(entity_type, id)? {
                Ok(())
            } else {
                Err(Error::not_found(entity_type, id))
            }
        };

        if mode.is_skip() {
            delete_local(&mut self.store)?;
            debug!(entity_type, id, "deleted locally");
        } else {
            let remote_id = Self::remote_id_of(entity)?;
            let service = M::MAPPING.service;
            run(
                &mut self.store,
                &self.remote,
                delete_local,
                |remote, _, ()| {
                    remote.delete(service, &remote_id)?;
                    Ok(())
                },
            )?;
            info!(entity_type, id, remote_id = %remote_id, "deleted");
        }

        entity.id = None;
        Ok(())
    }

    /// Compare an entity against its current remote copy, field by field.
    pub fn check_conflicts<M: FieldMapping>(&self, entity: &Entity) -> Result<ConflictReport> {
        Self::check_type::<M>(entity)?;
        let remote_id = Self::remote_id_of(entity)?;
        let snapshot = self.remote.get(M::MAPPING.service, &remote_id)?;
        M::MAPPING.conflicting_fields(entity, &snapshot, &KnownRelated::new())
    }

    /// Insert many entities locally.
    ///
    /// Skip mode only: there is no remote bulk endpoint.
    pub fn bulk_create<M: FieldMapping>(
        &mut self,
        entities: Vec<Entity>,
        mode: SyncMode,
    ) -> Result<Vec<Entity>> {
        if !mode.is_skip() {
            return Err(Error::unsupported("bulk create on the synced path"));
        }
        for entity in &entities {
            Self::check_type::<M>(entity)?;
        }

        let now = self.clock.now();
        atomic(&mut self.store, |store| {
            entities
                .into_iter()
                .map(|mut entity| {
                    entity.created_at = now;
                    entity.modified_at = now;
                    entity.id = Some(store.insert(&entity)?);
                    Ok(entity)
                })
                .collect()
        })
    }

    /// Set `values` on every local row matching `query`. Returns the row count.
    ///
    /// Skip mode only.
    pub fn update_where<M: FieldMapping>(
        &mut self,
        query: &LocalQuery,
        values: &BTreeMap<String, Value>,
        mode: SyncMode,
    ) -> Result<usize> {
        if !mode.is_skip() {
            return Err(Error::unsupported("bulk update on the synced path"));
        }

        let rows = self.select::<M>(query, mode)?;
        let now = self.clock.now();
        atomic(&mut self.store, |store| {
            for mut row in rows.iter().cloned() {
                for (field, value) in values {
                    row.set(field.clone(), value.clone());
                }
                row.modified_at = now;
                store.update(&row)?;
            }
            Ok(rows.len())
        })
    }

    /// Delete every local row matching `query`. Returns the row count.
    ///
    /// Skip mode only.
    pub fn delete_where<M: FieldMapping>(
        &mut self,
        query: &LocalQuery,
        mode: SyncMode,
    ) -> Result<usize> {
        if !mode.is_skip() {
            return Err(Error::unsupported("bulk delete on the synced path"));
        }

        let rows = self.select::<M>(query, mode)?;
        let entity_type = M::MAPPING.entity_type;
        atomic(&mut self.store, |store| {
            for row in &rows {
                if let Some(id) = row.id {
                    store.delete(entity_type, id)?;
                }
            }
            Ok(rows.len())
        })
    }
}
