//! Field codecs: local [`Value`]s to remote wire values and back.
//!
//! Codecs are pure. They never perform I/O and only fail on values outside
//! their declared domain or on malformed wire data.
//!
//! Timestamps travel as `/Date(<millis since epoch>)/` in UTC. Encoding keeps
//! whole seconds only, so a round trip is lossy below one second; the sync
//! tolerance window absorbs that.

use crate::{error::Result, EntityRef, Error, Value};
use chrono::{DateTime, Utc};
use serde_json::{json, Value as Wire};
use std::collections::HashMap;

/// Key of the id inside a remote reference object (`{"Id": "..."}`).
pub const REF_ID_KEY: &str = "Id";

/// How a single field is transcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Text. `nullable` decides whether an empty remote string decodes to
    /// `Null` (nullable) or `""` (not nullable).
    String { nullable: bool },
    Integer,
    Boolean,
    DateTime,
    /// Opaque id of a remote lookup, stored locally as a plain string.
    IdRef,
    /// Reference to another mapped entity type.
    ObjectRef { entity_type: &'static str },
}

impl Codec {
    pub const fn string() -> Self {
        Codec::String { nullable: false }
    }

    pub const fn nullable_string() -> Self {
        Codec::String { nullable: true }
    }

    pub const fn object_ref(entity_type: &'static str) -> Self {
        Codec::ObjectRef { entity_type }
    }

    /// Whether this codec encodes a reference (`{"Id": ...}`) on the wire.
    pub fn is_reference(&self) -> bool {
        matches!(self, Codec::IdRef | Codec::ObjectRef { .. })
    }

    fn expected(&self) -> &'static str {
        match self {
            Codec::String { .. } => "String",
            Codec::Integer => "Int",
            Codec::Boolean => "Bool",
            Codec::DateTime => "DateTime",
            Codec::IdRef => "String",
            Codec::ObjectRef { .. } => "Ref",
        }
    }

    fn mismatch(&self, field: &str, got: &Value) -> Error {
        Error::TypeMismatch {
            field: field.to_string(),
            expected: self.expected().to_string(),
            got: got.type_name().to_string(),
        }
    }

    /// Encode a local value for the wire.
    pub fn to_remote(&self, field: &str, value: &Value) -> Result<Wire> {
        match (self, value) {
            (Codec::String { .. }, Value::Null) => Ok(Wire::String(String::new())),
            (Codec::String { .. }, Value::String(s)) => Ok(Wire::String(s.clone())),

            (Codec::Integer, Value::Null) => Ok(Wire::Null),
            (Codec::Integer, Value::Int(i)) => Ok(json!(i)),

            (Codec::Boolean, Value::Null) => Ok(Wire::Null),
            (Codec::Boolean, Value::Bool(b)) => Ok(Wire::Bool(*b)),

            (Codec::DateTime, Value::Null) => Ok(Wire::Null),
            (Codec::DateTime, Value::DateTime(dt)) => Ok(Wire::String(format_wire_datetime(dt))),

            (Codec::IdRef, Value::Null) => Ok(Wire::Null),
            (Codec::IdRef, Value::String(id)) if id.is_empty() => Ok(Wire::Null),
            (Codec::IdRef, Value::String(id)) => Ok(json!({ REF_ID_KEY: id })),

            (Codec::ObjectRef { .. }, Value::Null) => Ok(Wire::Null),
            (Codec::ObjectRef { entity_type }, Value::Ref(r)) => {
                if r.remote_id.is_empty() {
                    return Err(Error::MissingRemoteId(format!(
                        "{} referenced by '{}'",
                        entity_type, field
                    )));
                }
                Ok(json!({ REF_ID_KEY: r.remote_id }))
            }

            (codec, other) => Err(codec.mismatch(field, other)),
        }
    }

    /// Decode a wire value.
    ///
    /// `known` maps remote ids to already-materialized references; an object
    /// reference found there is substituted instead of building a stub.
    pub fn from_remote(
        &self,
        field: &str,
        wire: &Wire,
        known: Option<&HashMap<String, EntityRef>>,
    ) -> Result<Value> {
        let invalid = |reason: &str| Error::InvalidWireValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        match self {
            Codec::String { nullable } => match wire {
                Wire::Null if *nullable => Ok(Value::Null),
                Wire::Null => Ok(Value::String(String::new())),
                Wire::String(s) if s.is_empty() && *nullable => Ok(Value::Null),
                Wire::String(s) => Ok(Value::String(s.clone())),
                _ => Err(invalid("expected a string")),
            },
            Codec::Integer => match wire {
                Wire::Null => Ok(Value::Null),
                Wire::Number(n) => n
                    .as_i64()
                    .map(Value::Int)
                    .ok_or_else(|| invalid("expected an integer")),
                _ => Err(invalid("expected an integer")),
            },
            Codec::Boolean => match wire {
                Wire::Null => Ok(Value::Null),
                Wire::Bool(b) => Ok(Value::Bool(*b)),
                _ => Err(invalid("expected a boolean")),
            },
            Codec::DateTime => match wire {
                Wire::Null => Ok(Value::Null),
                Wire::String(s) if s.is_empty() => Ok(Value::Null),
                Wire::String(s) => parse_wire_datetime(s).map(Value::DateTime),
                _ => Err(invalid("expected a /Date(...)/ string")),
            },
            Codec::IdRef => match reference_id(wire).map_err(|r| invalid(r))? {
                None => Ok(Value::Null),
                Some(id) => Ok(Value::String(id.to_string())),
            },
            Codec::ObjectRef { entity_type } => {
                match reference_id(wire).map_err(|r| invalid(r))? {
                    None => Ok(Value::Null),
                    Some(id) => {
                        let resolved = known.and_then(|k| k.get(id)).cloned();
                        Ok(Value::Ref(
                            resolved.unwrap_or_else(|| EntityRef::stub(*entity_type, id)),
                        ))
                    }
                }
            }
        }
    }
}

fn reference_id(wire: &Wire) -> std::result::Result<Option<&str>, &'static str> {
    match wire {
        Wire::Null => Ok(None),
        Wire::Object(obj) => match obj.get(REF_ID_KEY) {
            None | Some(Wire::Null) => Ok(None),
            Some(Wire::String(id)) if id.is_empty() => Ok(None),
            Some(Wire::String(id)) => Ok(Some(id)),
            Some(_) => Err("reference id must be a string"),
        },
        _ => Err("expected a reference object"),
    }
}

/// Format a timestamp as `/Date(<millis>)/`, truncated to whole seconds.
pub fn format_wire_datetime(dt: &DateTime<Utc>) -> String {
    format!("/Date({})/", dt.timestamp() * 1000)
}

/// Parse a `/Date(<millis>)/` wire timestamp into a UTC instant.
pub fn parse_wire_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let millis = raw
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
        .and_then(|digits| digits.parse::<i64>().ok())
        .ok_or_else(|| Error::InvalidTimestamp(raw.to_string()))?;

    DateTime::from_timestamp_millis(millis).ok_or_else(|| Error::InvalidTimestamp(raw.to_string()))
}
