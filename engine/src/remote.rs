//! The remote API seam.
//!
//! The orchestrator talks to the remote CRM only through [`RemoteApi`]. The
//! HTTP implementation lives in the client crate; [`MockRemote`] is an
//! in-process stand-in that records every call.

use crate::clock::{Clock, SystemClock};
use crate::codec::format_wire_datetime;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Remote-field-name to wire-value pairs, as returned by get/list calls.
pub type RemoteSnapshot = serde_json::Map<String, serde_json::Value>;

/// Remote last-modified timestamp key.
pub const MODIFIED_ON: &str = "ModifiedOn";
/// Remote creation timestamp key.
pub const CREATED_ON: &str = "CreatedOn";

/// Failure of a remote call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{service} '{id}' not found")]
    NotFound { service: String, id: String },

    #[error("remote returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// HTTP-like status code, when the failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::NotFound { .. } => Some(404),
            RemoteError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The five logical operations the orchestrator needs from the remote system.
///
/// Calls are blocking. Implementations don't retry.
pub trait RemoteApi {
    fn get(&self, service: &str, id: &str) -> RemoteResult<RemoteSnapshot>;

    /// `filters` are ANDed filter expressions.
    fn list(&self, service: &str, filters: &[String]) -> RemoteResult<Vec<RemoteSnapshot>>;

    /// The returned snapshot carries the new id under `"{service}Id"`.
    fn create(&self, service: &str, data: &RemoteSnapshot) -> RemoteResult<RemoteSnapshot>;

    fn update(&self, service: &str, id: &str, data: &RemoteSnapshot)
        -> RemoteResult<RemoteSnapshot>;

    fn delete(&self, service: &str, id: &str) -> RemoteResult<()>;
}

impl<T: RemoteApi + ?Sized> RemoteApi for &T {
    fn get(&self, service: &str, id: &str) -> RemoteResult<RemoteSnapshot> {
        (**self).get(service, id)
    }

    fn list(&self, service: &str, filters: &[String]) -> RemoteResult<Vec<RemoteSnapshot>> {
        (**self).list(service, filters)
    }

    fn create(&self, service: &str, data: &RemoteSnapshot) -> RemoteResult<RemoteSnapshot> {
        (**self).create(service, data)
    }

    fn update(
        &self,
        service: &str,
        id: &str,
        data: &RemoteSnapshot,
    ) -> RemoteResult<RemoteSnapshot> {
        (**self).update(service, id, data)
    }

    fn delete(&self, service: &str, id: &str) -> RemoteResult<()> {
        (**self).delete(service, id)
    }
}

/// Which remote operation a call was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Get,
    List,
    Create,
    Update,
    Delete,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteOp::Get => "get",
            RemoteOp::List => "list",
            RemoteOp::Create => "create",
            RemoteOp::Update => "update",
            RemoteOp::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One recorded call against [`MockRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub service: String,
    pub id: Option<String>,
    /// Payload sent with create/update
    pub data: Option<RemoteSnapshot>,
    /// Filters sent with list
    pub filters: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    records: HashMap<String, BTreeMap<String, RemoteSnapshot>>,
    calls: Vec<RemoteCall>,
    failures: HashMap<RemoteOp, RemoteError>,
    next_ids: Vec<String>,
}

/// In-memory remote system for tests and local development.
///
/// - every call is recorded, including calls that fail
/// - failures can be injected per operation and stay until cleared
/// - create/update stamp `ModifiedOn` (and `CreatedOn` on create) from the clock
/// - `list` ignores filters and returns every record of the service
#[derive(Debug)]
pub struct MockRemote {
    state: Mutex<MockState>,
    clock: Arc<dyn Clock>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp records from the given clock instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a record as-is, without recording a call.
    pub fn seed(&self, service: &str, id: &str, snapshot: RemoteSnapshot) {
        self.state()
            .records
            .entry(service.to_string())
            .or_default()
            .insert(id.to_string(), snapshot);
    }

    /// Current stored record, without recording a call.
    pub fn record(&self, service: &str, id: &str) -> Option<RemoteSnapshot> {
        self.state()
            .records
            .get(service)
            .and_then(|records| records.get(id))
            .cloned()
    }

    pub fn record_count(&self, service: &str) -> usize {
        self.state().records.get(service).map_or(0, BTreeMap::len)
    }

    /// Make every subsequent `op` call fail with `error`.
    pub fn fail(&self, op: RemoteOp, error: RemoteError) {
        self.state().failures.insert(op, error);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Use `id` for the next created record.
    pub fn push_next_id(&self, id: impl Into<String>) {
        self.state().next_ids.insert(0, id.into());
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn calls_for(&self, op: RemoteOp) -> Vec<RemoteCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn begin_call(
        &self,
        call: RemoteCall,
    ) -> RemoteResult<MutexGuard<'_, MockState>> {
        debug!(op = %call.op, service = %call.service, id = ?call.id, "mock remote call");
        let mut state = self.state();
        let op = call.op;
        state.calls.push(call);
        match state.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(state),
        }
    }

    fn now_wire(&self) -> serde_json::Value {
        serde_json::Value::String(format_wire_datetime(&self.clock.now()))
    }
}

fn not_found(service: &str, id: &str) -> RemoteError {
    RemoteError::NotFound {
        service: service.to_string(),
        id: id.to_string(),
    }
}

impl RemoteApi for MockRemote {
    fn get(&self, service: &str, id: &str) -> RemoteResult<RemoteSnapshot> {
        let state = self.begin_call(RemoteCall {
            op: RemoteOp::Get,
            service: service.to_string(),
            id: Some(id.to_string()),
            data: None,
            filters: Vec::new(),
        })?;

        state
            .records
            .get(service)
            .and_then(|records| records.get(id))
            .cloned()
            .ok_or_else(|| not_found(service, id))
    }

    fn list(&self, service: &str, filters: &[String]) -> RemoteResult<Vec<RemoteSnapshot>> {
        let state = self.begin_call(RemoteCall {
            op: RemoteOp::List,
            service: service.to_string(),
            id: None,
            data: None,
            filters: filters.to_vec(),
        })?;

        Ok(state
            .records
            .get(service)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    fn create(&self, service: &str, data: &RemoteSnapshot) -> RemoteResult<RemoteSnapshot> {
        let now = self.now_wire();
        let mut state = self.begin_call(RemoteCall {
            op: RemoteOp::Create,
            service: service.to_string(),
            id: None,
            data: Some(data.clone()),
            filters: Vec::new(),
        })?;

        let id = state
            .next_ids
            .pop()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut record = data.clone();
        record.insert(format!("{service}Id"), serde_json::Value::String(id.clone()));
        record.insert(CREATED_ON.to_string(), now.clone());
        record.insert(MODIFIED_ON.to_string(), now);

        state
            .records
            .entry(service.to_string())
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    fn update(
        &self,
        service: &str,
        id: &str,
        data: &RemoteSnapshot,
    ) -> RemoteResult<RemoteSnapshot> {
        let now = self.now_wire();
        let mut state = self.begin_call(RemoteCall {
            op: RemoteOp::Update,
            service: service.to_string(),
            id: Some(id.to_string()),
            data: Some(data.clone()),
            filters: Vec::new(),
        })?;

        let record = state
            .records
            .get_mut(service)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| not_found(service, id))?;

        for (key, value) in data {
            record.insert(key.clone(), value.clone());
        }
        record.insert(MODIFIED_ON.to_string(), now);
        Ok(record.clone())
    }

    fn delete(&self, service: &str, id: &str) -> RemoteResult<()> {
        let mut state = self.begin_call(RemoteCall {
            op: RemoteOp::Delete,
            service: service.to_string(),
            id: Some(id.to_string()),
            data: None,
            filters: Vec::new(),
        })?;

        state
            .records
            .get_mut(service)
            .and_then(|records| records.remove(id))
            .map(|_| ())
            .ok_or_else(|| not_found(service, id))
    }
}
