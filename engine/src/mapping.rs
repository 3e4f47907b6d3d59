//! Entity mappings: per-type tables from local fields to remote fields.
//!
//! Every synced entity type implements [`FieldMapping`] once, exposing a
//! static [`EntityMapping`]. The table is read-only and resolved at compile
//! time; nothing reflects over entity fields at runtime.
//!
//! ```rust
//! use crmsync_engine::{Codec, EntityMapping, FieldMapping, FieldSpec};
//!
//! struct Contact;
//!
//! impl FieldMapping for Contact {
//!     const MAPPING: EntityMapping = EntityMapping::new(
//!         "contact",
//!         "Contact",
//!         &[
//!             FieldSpec::new("first_name", "FirstName", Codec::string()),
//!             FieldSpec::new("organisation", "ParentCustomerId", Codec::object_ref("organisation")),
//!         ],
//!     );
//! }
//!
//! assert_eq!(Contact::MAPPING.remote_id_key(), "ContactId");
//! assert!(Contact::MAPPING.get_remote_field("last_login").is_err());
//! ```

use crate::{
    codec::Codec, conflict::ConflictReport, error::Result, remote::RemoteSnapshot, Entity,
    EntityRef, Error, Value,
};
use serde_json::Value as Wire;
use std::collections::HashMap;

/// One row of a mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Local field name
    pub local: &'static str,
    /// Remote field name
    pub remote: &'static str,
    pub codec: Codec,
}

impl FieldSpec {
    pub const fn new(local: &'static str, remote: &'static str, codec: Codec) -> Self {
        Self {
            local,
            remote,
            codec,
        }
    }

    pub fn to_remote(&self, value: &Value) -> Result<Wire> {
        self.codec.to_remote(self.local, value)
    }

    pub fn from_remote(
        &self,
        wire: &Wire,
        known: Option<&HashMap<String, EntityRef>>,
    ) -> Result<Value> {
        self.codec.from_remote(self.local, wire, known)
    }
}

/// The mapping table for one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMapping {
    /// Local entity type name
    pub entity_type: &'static str,
    /// Remote service (collection) name
    pub service: &'static str,
    pub fields: &'static [FieldSpec],
}

impl EntityMapping {
    pub const fn new(
        entity_type: &'static str,
        service: &'static str,
        fields: &'static [FieldSpec],
    ) -> Self {
        Self {
            entity_type,
            service,
            fields,
        }
    }

    pub fn service_name(&self) -> &'static str {
        self.service
    }

    /// Look up the mapping for a local field.
    ///
    /// `FieldNotMapped` means "skip this field" to callers walking every
    /// local field.
    pub fn get_remote_field(&self, local: &str) -> Result<&FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.local == local)
            .ok_or_else(|| Error::FieldNotMapped(local.to_string()))
    }

    /// Key holding the remote primary key: `"{Service}Id"`.
    pub fn remote_id_key(&self) -> String {
        format!("{}Id", self.service)
    }

    /// Extract the remote primary key from a snapshot.
    pub fn get_remote_id(&self, snapshot: &RemoteSnapshot) -> Result<String> {
        let key = self.remote_id_key();
        match snapshot.get(&key) {
            Some(Wire::String(id)) if !id.is_empty() => Ok(id.clone()),
            _ => Err(Error::InvalidWireValue {
                field: key,
                reason: "missing remote id".to_string(),
            }),
        }
    }

    /// Write every mapped field of `entity` into `base`.
    ///
    /// Mapped fields the entity doesn't carry are sent as their encoded `Null`.
    pub fn to_remote_payload(&self, entity: &Entity, mut base: RemoteSnapshot) -> Result<RemoteSnapshot> {
        for spec in self.fields {
            let value = entity.get(spec.local).unwrap_or(&Value::Null);
            base.insert(spec.remote.to_string(), spec.to_remote(value)?);
        }
        Ok(base)
    }

    /// Overwrite the entity's mapped fields from a remote snapshot.
    ///
    /// Remote fields absent from the snapshot decode as wire `null`.
    pub fn apply_snapshot(
        &self,
        entity: &mut Entity,
        snapshot: &RemoteSnapshot,
        known: &KnownRelated,
    ) -> Result<()> {
        for spec in self.fields {
            let wire = snapshot.get(spec.remote).unwrap_or(&Wire::Null);
            let value = spec.from_remote(wire, known.for_field(spec.local))?;
            entity.set(spec.local, value);
        }
        Ok(())
    }

    /// Compare every mapped field of `entity` against the decoded snapshot.
    ///
    /// Local values are normalized through the codec first so that lossy
    /// encodings (sub-second timestamps, empty strings) don't show up as
    /// conflicts. A mapped field the entity doesn't carry compares as `Null`.
    pub fn conflicting_fields(
        &self,
        entity: &Entity,
        snapshot: &RemoteSnapshot,
        known: &KnownRelated,
    ) -> Result<ConflictReport> {
        let mut report = ConflictReport::new();

        for spec in self.fields {
            let yours = entity.get(spec.local).unwrap_or(&Value::Null);
            let known = known.for_field(spec.local);

            let wire = snapshot.get(spec.remote).unwrap_or(&Wire::Null);
            let theirs = spec.from_remote(wire, known)?;
            let normalized = spec.from_remote(&spec.to_remote(yours)?, known)?;

            if !theirs.same_as(&normalized) {
                report.insert(spec.local.to_string(), theirs, yours.clone());
            }
        }

        Ok(report)
    }
}

/// Implemented once per synced entity type.
pub trait FieldMapping {
    const MAPPING: EntityMapping;

    /// Adjust the outgoing payload after field mapping.
    fn decorate_payload(_payload: &mut RemoteSnapshot) {}

    /// Full remote payload for an entity, merged onto `base`.
    fn remote_payload(entity: &Entity, base: RemoteSnapshot) -> Result<RemoteSnapshot> {
        let mut payload = Self::MAPPING.to_remote_payload(entity, base)?;
        Self::decorate_payload(&mut payload);
        Ok(payload)
    }
}

/// Already-materialized related objects, by local field and remote id.
///
/// Decoding a reference through a known field substitutes the stored
/// reference instead of a stub, so no further remote call is needed to
/// reach a known parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownRelated {
    by_field: HashMap<String, HashMap<String, EntityRef>>,
}

impl KnownRelated {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `related` as the object behind `field` for its remote id.
    pub fn insert(&mut self, field: impl Into<String>, related: EntityRef) {
        self.by_field
            .entry(field.into())
            .or_default()
            .insert(related.remote_id.clone(), related);
    }

    pub fn for_field(&self, field: &str) -> Option<&HashMap<String, EntityRef>> {
        self.by_field.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Simple;

    impl FieldMapping for Simple {
        const MAPPING: EntityMapping = EntityMapping::new(
            "simple",
            "Simple",
            &[
                FieldSpec::new("name", "Name", Codec::string()),
                FieldSpec::new("dt_field", "DateTimeField", Codec::DateTime),
                FieldSpec::new("int_field", "IntField", Codec::Integer),
            ],
        );
    }

    struct Flagged;

    impl FieldMapping for Flagged {
        const MAPPING: EntityMapping = EntityMapping::new(
            "flagged",
            "Account",
            &[FieldSpec::new("name", "Name", Codec::string())],
        );

        fn decorate_payload(payload: &mut RemoteSnapshot) {
            if !payload.is_empty() {
                payload.insert("optevia_PAFOverride".into(), Wire::Bool(true));
            }
        }
    }

    fn snapshot(value: Wire) -> RemoteSnapshot {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn unmapped_field_is_reported() {
        assert!(Simple::MAPPING.get_remote_field("name").is_ok());
        assert!(matches!(
            Simple::MAPPING.get_remote_field("d_field"),
            Err(Error::FieldNotMapped(f)) if f == "d_field"
        ));
    }

    #[test]
    fn remote_id_convention() {
        let snap = snapshot(json!({"SimpleId": "guid-1", "Name": "x"}));
        assert_eq!(Simple::MAPPING.get_remote_id(&snap).unwrap(), "guid-1");

        let missing = snapshot(json!({"Name": "x"}));
        assert!(Simple::MAPPING.get_remote_id(&missing).is_err());
    }

    #[test]
    fn payload_contains_every_mapped_field() {
        let entity = Entity::new("simple")
            .with("name", "simple obj")
            .with("d_field", "ignored");

        let payload = Simple::remote_payload(&entity, RemoteSnapshot::new()).unwrap();
        assert_eq!(
            Wire::Object(payload),
            json!({"Name": "simple obj", "DateTimeField": null, "IntField": null})
        );
    }

    #[test]
    fn payload_merges_onto_base() {
        let base = snapshot(json!({"Name": "old", "Other": 1}));
        let entity = Entity::new("simple").with("name", "new");

        let payload = Simple::remote_payload(&entity, base).unwrap();
        assert_eq!(payload["Name"], json!("new"));
        assert_eq!(payload["Other"], json!(1));
    }

    #[test]
    fn decorate_hook_runs_after_mapping() {
        let entity = Entity::new("flagged").with("name", "acme");
        let payload = Flagged::remote_payload(&entity, RemoteSnapshot::new()).unwrap();
        assert_eq!(payload["optevia_PAFOverride"], json!(true));
    }

    #[test]
    fn apply_snapshot_overwrites_mapped_fields() {
        let mut entity = Entity::new("simple")
            .with("name", "old")
            .with("d_field", "kept");
        let snap = snapshot(json!({
            "Name": "new name",
            "DateTimeField": "/Date(1451606400000)/",
            "IntField": 5
        }));

        Simple::MAPPING
            .apply_snapshot(&mut entity, &snap, &KnownRelated::new())
            .unwrap();
        assert_eq!(entity.get("name"), Some(&Value::from("new name")));
        assert_eq!(entity.get("int_field"), Some(&Value::Int(5)));
        assert_eq!(entity.get("d_field"), Some(&Value::from("kept")));
        assert!(entity.get("dt_field").unwrap().as_datetime().is_some());
    }

    #[test]
    fn conflicting_fields_reports_theirs_and_yours() {
        let entity = Entity::new("simple")
            .with("name", "mine")
            .with("int_field", 1)
            .with("d_field", "unmapped");
        let snap = snapshot(json!({"Name": "theirs", "IntField": 1, "DateTimeField": null}));

        let report = Simple::MAPPING
            .conflicting_fields(&entity, &snap, &KnownRelated::new())
            .unwrap();
        assert_eq!(report.len(), 1);
        let conflict = report.get("name").unwrap();
        assert_eq!(conflict.theirs, Value::from("theirs"));
        assert_eq!(conflict.yours, Value::from("mine"));
    }

    #[test]
    fn mapped_field_missing_locally_is_a_conflict() {
        let entity = Entity::new("simple").with("name", "same");
        let snap = snapshot(json!({"Name": "same", "IntField": 4}));

        let report = Simple::MAPPING
            .conflicting_fields(&entity, &snap, &KnownRelated::new())
            .unwrap();
        assert_eq!(report.len(), 1);
        let conflict = report.get("int_field").unwrap();
        assert_eq!(conflict.theirs, Value::Int(4));
        assert_eq!(conflict.yours, Value::Null);
    }

    #[test]
    fn unencodable_local_value_is_an_error() {
        let entity = Entity::new("simple").with("int_field", "four");
        let snap = snapshot(json!({"IntField": 4}));

        assert!(matches!(
            Simple::MAPPING.conflicting_fields(&entity, &snap, &KnownRelated::new()),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn subsecond_difference_is_not_a_conflict() {
        let dt = chrono::DateTime::from_timestamp_millis(1_451_606_400_500).unwrap();
        let entity = Entity::new("simple").with("dt_field", dt);
        let snap = snapshot(json!({"DateTimeField": "/Date(1451606400000)/"}));

        let report = Simple::MAPPING
            .conflicting_fields(&entity, &snap, &KnownRelated::new())
            .unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn known_related_is_keyed_by_remote_id() {
        let mut known = KnownRelated::new();
        known.insert("organisation", EntityRef::stub("organisation", "org-1"));

        let field = known.for_field("organisation").unwrap();
        assert!(field.contains_key("org-1"));
        assert!(known.for_field("other").is_none());
    }
}
