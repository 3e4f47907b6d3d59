//! Timestamp-based staleness detection.
//!
//! The remote system's last-modified stamp is the only concurrency control:
//! a coarse compare-and-swap that tolerates clock skew and codec truncation
//! up to the configured sync delta.

use crate::{
    codec::parse_wire_datetime,
    error::Result,
    remote::{RemoteSnapshot, CREATED_ON, MODIFIED_ON},
    Error,
};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Outcome of comparing a local entity against its remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDecision {
    /// The remote copy is newer than the local one by more than the tolerance
    pub changed: bool,
    pub remote_modified_at: DateTime<Utc>,
    pub remote_created_at: DateTime<Utc>,
}

impl SyncDecision {
    /// Compare timestamps.
    ///
    /// Fails with [`Error::ObjectsNotInSync`] when the local copy is ahead of
    /// the remote one by more than `tolerance`.
    pub fn evaluate(
        local_modified_at: DateTime<Utc>,
        remote_modified_at: DateTime<Utc>,
        remote_created_at: DateTime<Utc>,
        tolerance: Duration,
    ) -> Result<Self> {
        let tolerance_ms = i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX);
        let delta_ms = remote_modified_at
            .signed_duration_since(local_modified_at)
            .num_milliseconds();

        if delta_ms < -tolerance_ms {
            return Err(Error::ObjectsNotInSync {
                local_modified: local_modified_at,
                remote_modified: remote_modified_at,
            });
        }

        Ok(Self {
            changed: delta_ms > tolerance_ms,
            remote_modified_at,
            remote_created_at,
        })
    }

    /// Read `ModifiedOn`/`CreatedOn` out of a snapshot and compare.
    pub fn from_snapshot(
        local_modified_at: DateTime<Utc>,
        snapshot: &RemoteSnapshot,
        tolerance: Duration,
    ) -> Result<Self> {
        let remote_modified_at = snapshot_timestamp(snapshot, MODIFIED_ON)?;
        let remote_created_at = snapshot_timestamp(snapshot, CREATED_ON)?;
        Self::evaluate(
            local_modified_at,
            remote_modified_at,
            remote_created_at,
            tolerance,
        )
    }
}

/// Parse a wire timestamp stored under `key`.
pub fn snapshot_timestamp(snapshot: &RemoteSnapshot, key: &str) -> Result<DateTime<Utc>> {
    match snapshot.get(key) {
        Some(serde_json::Value::String(raw)) => parse_wire_datetime(raw),
        _ => Err(Error::InvalidWireValue {
            field: key.to_string(),
            reason: "missing timestamp".to_string(),
        }),
    }
}

/// Like [`snapshot_timestamp`], but a missing or null stamp is `None`.
pub fn optional_timestamp(snapshot: &RemoteSnapshot, key: &str) -> Result<Option<DateTime<Utc>>> {
    match snapshot.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(_) => snapshot_timestamp(snapshot, key).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    const DELTA: Duration = Duration::from_secs(2);

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_451_606_400, 0).unwrap()
    }

    fn decide(offset_secs: i64) -> Result<SyncDecision> {
        let remote = t0() + TimeDelta::seconds(offset_secs);
        SyncDecision::evaluate(t0(), remote, t0(), DELTA)
    }

    #[test]
    fn local_ahead_is_not_in_sync() {
        assert!(matches!(decide(-3), Err(Error::ObjectsNotInSync { .. })));
    }

    #[test]
    fn remote_ahead_is_changed() {
        assert!(decide(3).unwrap().changed);
    }

    #[test]
    fn within_tolerance_is_unchanged() {
        for offset in [-2, -1, 0, 1, 2] {
            assert!(!decide(offset).unwrap().changed, "offset {offset}");
        }
    }

    #[test]
    fn millisecond_boundaries() {
        let remote = t0() + TimeDelta::milliseconds(2001);
        assert!(SyncDecision::evaluate(t0(), remote, t0(), DELTA).unwrap().changed);

        let remote = t0() - TimeDelta::milliseconds(2001);
        assert!(SyncDecision::evaluate(t0(), remote, t0(), DELTA).is_err());
    }

    #[test]
    fn placeholder_always_pulls() {
        let decision =
            SyncDecision::evaluate(DateTime::<Utc>::MIN_UTC, t0(), t0(), DELTA).unwrap();
        assert!(decision.changed);
    }

    #[test]
    fn reads_stamps_from_snapshot() {
        let snapshot = json!({
            "ModifiedOn": "/Date(1451606403000)/",
            "CreatedOn": "/Date(1451606400000)/"
        });
        let decision =
            SyncDecision::from_snapshot(t0(), snapshot.as_object().unwrap(), DELTA).unwrap();
        assert!(decision.changed);
        assert_eq!(decision.remote_created_at, t0());
        assert_eq!(decision.remote_modified_at, t0() + TimeDelta::seconds(3));
    }

    #[test]
    fn optional_stamp() {
        let snapshot = json!({"ModifiedOn": "/Date(1451606403000)/", "CreatedOn": null});
        let snapshot = snapshot.as_object().unwrap();
        assert!(optional_timestamp(snapshot, CREATED_ON).unwrap().is_none());
        assert!(optional_timestamp(snapshot, MODIFIED_ON).unwrap().is_some());

        let malformed = json!({"ModifiedOn": "soon"});
        assert!(optional_timestamp(malformed.as_object().unwrap(), MODIFIED_ON).is_err());
    }

    #[test]
    fn missing_stamp_is_invalid() {
        let snapshot = json!({"ModifiedOn": "/Date(1451606403000)/"});
        assert!(matches!(
            SyncDecision::from_snapshot(t0(), snapshot.as_object().unwrap(), DELTA),
            Err(Error::InvalidWireValue { ref field, .. }) if field == "CreatedOn"
        ));
    }
}
