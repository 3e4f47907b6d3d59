//! # crmsync Engine
//!
//! The sync and query-translation core between a local store and a remote
//! CRM exposed through an OData-style REST API.
//!
//! The engine decides when a remote round trip is needed, detects stale and
//! conflicting copies, translates local predicates into remote filter
//! expressions, and pairs every local write with its remote call inside one
//! local transaction.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine reaches the outside world only through the
//!   [`LocalStore`] and [`RemoteApi`] traits
//! - **Explicit bypass**: every operation takes a [`SyncMode`]; there is no
//!   ambient "skip sync" state
//! - **Fail loudly**: query shapes the remote side can't express are
//!   rejected, never approximated
//!
//! ## Core Concepts
//!
//! ### Entity mappings
//!
//! Each synced type implements [`FieldMapping`] with a static table of
//! `(local field, remote field, codec)` triples. [`Codec`]s transcode single
//! values and never perform I/O.
//!
//! ### Sync decision
//!
//! A [`SyncDecision`] compares the remote `ModifiedOn` stamp with the local
//! `modified_at` against the configured sync delta:
//!
//! - remote older by more than the delta: [`Error::ObjectsNotInSync`]
//! - remote newer by more than the delta: changed, pull it in
//! - otherwise: unchanged
//!
//! ### Queries
//!
//! [`Query`] is the synced read path and accepts one flat conjunction of
//! comparisons. [`LocalQuery`] is the local-only bypass path.
//!
//! ## Quick Start
//!
//! ```rust
//! use crmsync_engine::{
//!     Codec, Entity, EntityMapping, FieldMapping, FieldSpec, MemoryStore, MockRemote,
//!     Predicate, Query, RemoteOp, SyncConfig, SyncMode, Synchronizer,
//! };
//!
//! struct Simple;
//!
//! impl FieldMapping for Simple {
//!     const MAPPING: EntityMapping = EntityMapping::new(
//!         "simple",
//!         "Simple",
//!         &[FieldSpec::new("name", "Name", Codec::string())],
//!     );
//! }
//!
//! let mut sync = Synchronizer::new(MemoryStore::new(), MockRemote::new(), SyncConfig::default());
//!
//! // 1. Create: local insert + remote create in one transaction
//! let mut obj = Entity::new("simple").with("name", "simple obj");
//! sync.create::<Simple>(&mut obj, SyncMode::Sync).unwrap();
//! assert!(obj.is_synced());
//!
//! // 2. Query: translated to `Name eq 'simple obj'`
//! let query = Query::filtered(Predicate::eq("name", "simple obj")).unwrap();
//! let found = sync.filter::<Simple>(&query, SyncMode::Sync).unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(sync.remote().calls_for(RemoteOp::List)[0].filters, vec!["Name eq 'simple obj'"]);
//! ```
//!
//! ## Persistence
//!
//! [`MemoryStore::export_state`] and [`MemoryStore::import_state`] move the
//! whole local store in and out of a [`StoreSnapshot`], which serializes to
//! JSON with deterministic ordering.

pub mod clock;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod decision;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod query;
pub mod remote;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod transaction;
pub mod value;

// Re-export main types at crate root
pub use clock::{Clock, FixedClock, SystemClock};
pub use codec::{format_wire_datetime, parse_wire_datetime, Codec};
pub use config::SyncConfig;
pub use conflict::{ConflictReport, FieldConflict};
pub use decision::SyncDecision;
pub use entity::{Entity, EntityState, SyncStamps};
pub use error::{Error, Result};
pub use mapping::{EntityMapping, FieldMapping, FieldSpec, KnownRelated};
pub use query::{translate, Condition, LocalQuery, Lookup, Predicate, Query, RemoteClause};
pub use remote::{
    MockRemote, RemoteApi, RemoteCall, RemoteError, RemoteOp, RemoteResult, RemoteSnapshot,
};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{LocalStore, MemoryStore};
pub use sync::{SyncMode, Synchronizer};
pub use transaction::{atomic, run};
pub use value::{EntityRef, Value};

/// Store-assigned local primary key.
pub type LocalId = u64;
