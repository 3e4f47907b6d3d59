//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, Utc};
use crmsync_engine::{
    format_wire_datetime, Codec, Entity, EntityMapping, FieldMapping, FieldSpec, FixedClock,
    MemoryStore, MockRemote, RemoteSnapshot, SyncConfig, SyncMode, Synchronizer,
};
use serde_json::{json, Value as Wire};
use std::sync::Arc;

pub struct Simple;

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

pub struct Organisation;

impl FieldMapping for Organisation {
    const MAPPING: EntityMapping = EntityMapping::new(
        "organisation",
        "Account",
        &[
            FieldSpec::new("name", "Name", Codec::string()),
            FieldSpec::new("alias", "optevia_Alias", Codec::nullable_string()),
            FieldSpec::new("country", "optevia_Country", Codec::IdRef),
            FieldSpec::new("uk_organisation", "optevia_ukorganisation", Codec::Boolean),
        ],
    );

    fn decorate_payload(payload: &mut RemoteSnapshot) {
        if !payload.is_empty() {
            payload.insert("optevia_PAFOverride".into(), Wire::Bool(true));
        }
    }
}

pub struct Contact;

impl FieldMapping for Contact {
    const MAPPING: EntityMapping = EntityMapping::new(
        "contact",
        "Contact",
        &[
            FieldSpec::new("first_name", "FirstName", Codec::string()),
            FieldSpec::new("last_name", "LastName", Codec::string()),
            FieldSpec::new(
                "organisation",
                "ParentCustomerId",
                Codec::object_ref("organisation"),
            ),
        ],
    );
}

pub type TestSync = Synchronizer<MemoryStore, MockRemote>;

pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_451_606_400, 0).unwrap()
}

/// `t0` shifted by whole seconds.
pub fn at(offset_secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(offset_secs)
}

/// A synchronizer and a mock remote sharing one clock frozen at `t0`.
pub fn setup() -> (TestSync, FixedClock) {
    let clock = FixedClock::new(t0());
    let remote = MockRemote::new().with_clock(Arc::new(clock.clone()));
    let sync = Synchronizer::new(MemoryStore::new(), remote, SyncConfig::default())
        .with_clock(Arc::new(clock.clone()));
    (sync, clock)
}

pub fn wire_time(dt: DateTime<Utc>) -> Wire {
    Wire::String(format_wire_datetime(&dt))
}

pub fn snapshot(value: Wire) -> RemoteSnapshot {
    value.as_object().cloned().unwrap()
}

pub fn simple_record(remote_id: &str, name: &str, modified: DateTime<Utc>) -> RemoteSnapshot {
    snapshot(json!({
        "SimpleId": remote_id,
        "Name": name,
        "DateTimeField": null,
        "IntField": null,
        "ModifiedOn": wire_time(modified),
        "CreatedOn": wire_time(t0()),
    }))
}

pub fn seed_simple(sync: &TestSync, remote_id: &str, name: &str, modified: DateTime<Utc>) {
    sync.remote()
        .seed("Simple", remote_id, simple_record(remote_id, name, modified));
}

pub fn contact_record(remote_id: &str, first_name: &str, org_id: &str) -> RemoteSnapshot {
    snapshot(json!({
        "ContactId": remote_id,
        "FirstName": first_name,
        "LastName": "Smith",
        "ParentCustomerId": {"Id": org_id},
        "ModifiedOn": wire_time(t0()),
        "CreatedOn": wire_time(t0()),
    }))
}

/// A local row carrying a remote id, stamped at the clock's current time
/// without any remote call.
pub fn local_simple(sync: &mut TestSync, remote_id: &str, name: &str) -> Entity {
    let mut entity = Entity::new("simple").with("name", name);
    entity.remote_id = remote_id.to_string();
    sync.create::<Simple>(&mut entity, SyncMode::Skip).unwrap();
    entity
}
