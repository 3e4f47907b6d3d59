//! Error types for the sync engine.

use crate::{conflict::ConflictReport, remote::RemoteError, LocalId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Mapping errors
    #[error("field not mapped: {0}")]
    FieldNotMapped(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("entity type mismatch: expected {expected}, got {got}")]
    EntityTypeMismatch { expected: String, got: String },

    // Wire errors
    #[error("invalid wire value for '{field}': {reason}")]
    InvalidWireValue { field: String, reason: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // Query errors
    #[error("unsupported query shape: {0}")]
    UnsupportedQueryShape(String),

    // Sync errors
    #[error(
        "objects not in sync: local modified at {local_modified}, remote modified at {remote_modified}"
    )]
    ObjectsNotInSync {
        local_modified: DateTime<Utc>,
        remote_modified: DateTime<Utc>,
    },

    #[error("sync conflict on {} field(s)", .0.len())]
    SyncConflict(ConflictReport),

    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),

    // Local store errors
    #[error("{entity_type} not found: {key}")]
    NotFound { entity_type: String, key: String },

    #[error("{entity_type} lookup returned {count} objects")]
    MultipleObjectsReturned { entity_type: String, count: usize },

    #[error("{0} has no remote id")]
    MissingRemoteId(String),

    #[error("{0} has not been saved locally")]
    NotPersisted(String),

    #[error("entity already persisted with id {0}")]
    AlreadyPersisted(LocalId),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn not_found(entity_type: &str, key: impl ToString) -> Self {
        Error::NotFound {
            entity_type: entity_type.to_string(),
            key: key.to_string(),
        }
    }

    pub(crate) fn unsupported(reason: impl Into<String>) -> Self {
        Error::UnsupportedQueryShape(reason.into())
    }

    /// True when the remote side reported the object as absent.
    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, Error::Remote(RemoteError::NotFound { .. }))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
