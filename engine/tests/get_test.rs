//! Read-by-identity: the refresh protocol.

mod common;

use common::*;
use crmsync_engine::{Entity, Error, LocalStore, Predicate, RemoteOp, SyncMode, Value};
use serde_json::json;

// ============================================================================
// Refresh by local id
// ============================================================================

#[test]
fn unchanged_remote_leaves_local_alone() {
    let (mut sync, _) = setup();
    let obj = local_simple(&mut sync, "cdms-pk", "local name");
    seed_simple(&sync, "cdms-pk", "remote name", at(1));

    let fetched = sync.get::<Simple>(obj.id.unwrap(), SyncMode::Sync).unwrap();

    assert_eq!(fetched.get("name"), Some(&Value::from("local name")));
    assert_eq!(fetched.modified_at, t0());
    assert_eq!(sync.remote().call_count(RemoteOp::Get), 1);
    assert_eq!(sync.remote().total_calls(), 1);
}

#[test]
fn newer_remote_is_pulled_in() {
    let (mut sync, _) = setup();
    let obj = local_simple(&mut sync, "cdms-pk", "local name");
    seed_simple(&sync, "cdms-pk", "remote name", at(3));

    let fetched = sync.get::<Simple>(obj.id.unwrap(), SyncMode::Sync).unwrap();

    assert_eq!(fetched.get("name"), Some(&Value::from("remote name")));
    assert_eq!(fetched.get("int_field"), Some(&Value::Null));
    assert_eq!(fetched.modified_at, at(3));
    assert_eq!(fetched.created_at, t0());

    let stored = sync.store().get("simple", obj.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored, fetched);

    // a read-driven pull never writes back
    assert_eq!(sync.remote().call_count(RemoteOp::Get), 1);
    assert_eq!(sync.remote().call_count(RemoteOp::Update), 0);
}

#[test]
fn local_ahead_of_remote_is_an_error() {
    let (mut sync, clock) = setup();
    seed_simple(&sync, "cdms-pk", "remote name", t0());
    clock.set(at(3));
    let obj = local_simple(&mut sync, "cdms-pk", "local name");

    let err = sync.get::<Simple>(obj.id.unwrap(), SyncMode::Sync).unwrap_err();
    assert!(matches!(err, Error::ObjectsNotInSync { .. }));

    let stored = sync.store().get("simple", obj.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("local name")));
}

#[test]
fn malformed_remote_timestamp_is_an_error() {
    let (mut sync, _) = setup();
    let obj = local_simple(&mut sync, "cdms-pk", "a");
    let mut record = simple_record("cdms-pk", "a", t0());
    record.insert("ModifiedOn".into(), json!("2016-01-01"));
    sync.remote().seed("Simple", "cdms-pk", record);

    assert!(matches!(
        sync.get::<Simple>(obj.id.unwrap(), SyncMode::Sync),
        Err(Error::InvalidTimestamp(_))
    ));
}

#[test]
fn local_only_entity_is_not_refreshed() {
    let (mut sync, _) = setup();
    let mut obj = Entity::new("simple").with("name", "a");
    sync.create::<Simple>(&mut obj, SyncMode::Skip).unwrap();

    let fetched = sync.get::<Simple>(obj.id.unwrap(), SyncMode::Sync).unwrap();
    assert_eq!(fetched, obj);
    assert_eq!(sync.remote().total_calls(), 0);
}

#[test]
fn skip_mode_reads_locally() {
    let (mut sync, _) = setup();
    let obj = local_simple(&mut sync, "cdms-pk", "a");
    seed_simple(&sync, "cdms-pk", "remote name", at(10));

    let fetched = sync.get::<Simple>(obj.id.unwrap(), SyncMode::Skip).unwrap();
    assert_eq!(fetched.get("name"), Some(&Value::from("a")));
    assert_eq!(sync.remote().total_calls(), 0);
}

#[test]
fn missing_local_id_is_not_found() {
    let (mut sync, _) = setup();
    assert!(matches!(
        sync.get::<Simple>(42, SyncMode::Sync),
        Err(Error::NotFound { .. })
    ));
    assert_eq!(sync.remote().total_calls(), 0);
}

#[test]
fn remote_deletion_surfaces_as_remote_error() {
    let (mut sync, _) = setup();
    let obj = local_simple(&mut sync, "cdms-pk", "a");

    let err = sync.get::<Simple>(obj.id.unwrap(), SyncMode::Sync).unwrap_err();
    assert!(err.is_remote_not_found());
    assert_eq!(sync.store().count("simple").unwrap(), 1);
}

// ============================================================================
// Refresh by remote id
// ============================================================================

#[test]
fn remote_only_object_is_pulled_into_local_store() {
    let (mut sync, _) = setup();
    seed_simple(&sync, "cdms-pk", "remote name", at(5));

    let fetched = sync
        .get_by_remote_id::<Simple>("cdms-pk", SyncMode::Sync)
        .unwrap();

    assert!(fetched.id.is_some());
    assert_eq!(fetched.remote_id, "cdms-pk");
    assert_eq!(fetched.get("name"), Some(&Value::from("remote name")));
    assert_eq!(fetched.modified_at, at(5));
    assert_eq!(sync.store().count("simple").unwrap(), 1);
    assert_eq!(sync.remote().call_count(RemoteOp::Get), 1);

    // second read finds the local copy and doesn't insert again
    let again = sync
        .get_by_remote_id::<Simple>("cdms-pk", SyncMode::Sync)
        .unwrap();
    assert_eq!(again, fetched);
    assert_eq!(sync.store().count("simple").unwrap(), 1);
}

#[test]
fn absent_on_both_sides_is_not_found() {
    let (mut sync, _) = setup();

    let err = sync
        .get_by_remote_id::<Simple>("nope", SyncMode::Sync)
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }));
    assert_eq!(sync.store().count("simple").unwrap(), 0);
    assert_eq!(sync.remote().call_count(RemoteOp::Get), 1);
}

#[test]
fn get_by_remote_id_in_skip_mode() {
    let (mut sync, _) = setup();
    seed_simple(&sync, "cdms-pk", "remote name", at(5));

    assert!(matches!(
        sync.get_by_remote_id::<Simple>("cdms-pk", SyncMode::Skip),
        Err(Error::NotFound { .. })
    ));

    let obj = local_simple(&mut sync, "cdms-pk", "local name");
    let fetched = sync
        .get_by_remote_id::<Simple>("cdms-pk", SyncMode::Skip)
        .unwrap();
    assert_eq!(fetched, obj);
    assert_eq!(sync.remote().total_calls(), 0);
}

// ============================================================================
// Lookup by local fields
// ============================================================================

#[test]
fn find_refreshes_single_match() {
    let (mut sync, _) = setup();
    local_simple(&mut sync, "cdms-pk", "a");
    seed_simple(&sync, "cdms-pk", "a", at(4));

    let found = sync
        .find::<Simple>(Predicate::eq("name", "a"), SyncMode::Sync)
        .unwrap();
    assert_eq!(found.modified_at, at(4));
    assert_eq!(sync.remote().call_count(RemoteOp::Get), 1);
}

#[test]
fn find_without_match_makes_no_remote_call() {
    let (mut sync, _) = setup();
    local_simple(&mut sync, "cdms-pk", "a");

    assert!(matches!(
        sync.find::<Simple>(Predicate::eq("name", "b"), SyncMode::Sync),
        Err(Error::NotFound { .. })
    ));
    assert_eq!(sync.remote().total_calls(), 0);
}

#[test]
fn find_with_several_matches_makes_no_remote_call() {
    let (mut sync, _) = setup();
    local_simple(&mut sync, "cdms-pk-1", "a");
    local_simple(&mut sync, "cdms-pk-2", "a");

    assert!(matches!(
        sync.find::<Simple>(Predicate::eq("name", "a"), SyncMode::Sync),
        Err(Error::MultipleObjectsReturned { count: 2, .. })
    ));
    assert_eq!(sync.remote().total_calls(), 0);
}
