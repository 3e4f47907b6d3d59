//! Predicates, remote filter translation and the two query paths.
//!
//! Synced reads go through [`Query`], which only admits what the remote
//! filter syntax can express: one flat conjunction of simple comparisons,
//! filtered once. Everything else is rejected with
//! [`Error::UnsupportedQueryShape`] instead of being approximated.
//!
//! [`LocalQuery`] is the bypass path. It evaluates arbitrary predicate trees,
//! exclusions, ordering and limits against the local store only.
//!
//! ## Operator table
//!
//! | Lookup                     | Remote expression        |
//! |----------------------------|--------------------------|
//! | `exact`, `iexact`          | `{f} eq {v}`             |
//! | `lt` / `lte`               | `{f} lt {v}` / `{f} le {v}` |
//! | `gt` / `gte`               | `{f} gt {v}` / `{f} ge {v}` |
//! | `contains`, `icontains`    | `substringof({v},{f})`   |
//! | `startswith`, `istartswith`| `startswith({f},{v})`    |
//! | `endswith`, `iendswith`    | `endswith({f},{v})`      |
//! | `year` .. `second`         | `{unit}({f}) eq {v}`     |
//!
//! Reference fields only support equality and render as `{f}/Id eq '{id}'`.

use crate::{
    codec::Codec,
    error::Result,
    mapping::{EntityMapping, KnownRelated},
    Entity, EntityRef, Error, Value,
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Separator between a field name and its lookup in a filter key.
pub const LOOKUP_SEPARATOR: &str = "__";

/// Comparison operator of a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookup {
    Exact,
    IExact,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Lookup {
    pub fn from_name(name: &str) -> Option<Self> {
        let lookup = match name {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "endswith" => Lookup::EndsWith,
            "iendswith" => Lookup::IEndsWith,
            "year" => Lookup::Year,
            "month" => Lookup::Month,
            "day" => Lookup::Day,
            "hour" => Lookup::Hour,
            "minute" => Lookup::Minute,
            "second" => Lookup::Second,
            _ => return None,
        };
        Some(lookup)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::StartsWith => "startswith",
            Lookup::IStartsWith => "istartswith",
            Lookup::EndsWith => "endswith",
            Lookup::IEndsWith => "iendswith",
            Lookup::Year => "year",
            Lookup::Month => "month",
            Lookup::Day => "day",
            Lookup::Hour => "hour",
            Lookup::Minute => "minute",
            Lookup::Second => "second",
        }
    }

    /// Split a filter key like `"name__gte"` into field and lookup.
    ///
    /// A bare field name means `exact`. Anything after the separator that
    /// isn't a known lookup (related-field traversal, `in`, `isnull`, ...) is
    /// rejected.
    pub fn parse_key(key: &str) -> Result<(&str, Lookup)> {
        match key.rsplit_once(LOOKUP_SEPARATOR) {
            None => Ok((key, Lookup::Exact)),
            Some((field, suffix)) => match Lookup::from_name(suffix) {
                Some(lookup) if !field.is_empty() && !field.contains(LOOKUP_SEPARATOR) => {
                    Ok((field, lookup))
                }
                _ => Err(Error::unsupported(format!("filter key '{key}'"))),
            },
        }
    }

    fn is_case_insensitive(&self) -> bool {
        matches!(
            self,
            Lookup::IExact | Lookup::IContains | Lookup::IStartsWith | Lookup::IEndsWith
        )
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A leaf comparison `(field, lookup, value)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub lookup: Lookup,
    pub value: Value,
}

impl Condition {
    /// Evaluate against a local entity. Missing fields read as `Null`.
    pub fn matches(&self, entity: &Entity) -> bool {
        let actual = entity.column(&self.field).unwrap_or(Value::Null);
        let expected = &self.value;

        match self.lookup {
            Lookup::Exact => values_equal(&actual, expected),
            Lookup::IExact => match (actual.as_str(), expected.as_str()) {
                (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
                _ => values_equal(&actual, expected),
            },
            Lookup::Lt => actual.compare(expected) == Some(Ordering::Less),
            Lookup::Lte => matches!(
                actual.compare(expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Lookup::Gt => actual.compare(expected) == Some(Ordering::Greater),
            Lookup::Gte => matches!(
                actual.compare(expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Lookup::Contains
            | Lookup::IContains
            | Lookup::StartsWith
            | Lookup::IStartsWith
            | Lookup::EndsWith
            | Lookup::IEndsWith => {
                let (Some(haystack), Some(needle)) = (actual.as_str(), expected.as_str()) else {
                    return false;
                };
                let (haystack, needle) = if self.lookup.is_case_insensitive() {
                    (haystack.to_lowercase(), needle.to_lowercase())
                } else {
                    (haystack.to_string(), needle.to_string())
                };
                match self.lookup {
                    Lookup::Contains | Lookup::IContains => haystack.contains(&needle),
                    Lookup::StartsWith | Lookup::IStartsWith => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                }
            }
            Lookup::Year
            | Lookup::Month
            | Lookup::Day
            | Lookup::Hour
            | Lookup::Minute
            | Lookup::Second => match (actual.as_datetime(), expected.as_i64()) {
                (Some(dt), Some(n)) => date_component(&dt, self.lookup) == Some(n),
                _ => false,
            },
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        // a reference field compared against a bare remote id
        (Value::Ref(r), Value::String(id)) => !id.is_empty() && r.remote_id == *id,
        _ => actual.same_as(expected),
    }
}

fn date_component(dt: &DateTime<Utc>, lookup: Lookup) -> Option<i64> {
    let n = match lookup {
        Lookup::Year => i64::from(dt.year()),
        Lookup::Month => i64::from(dt.month()),
        Lookup::Day => i64::from(dt.day()),
        Lookup::Hour => i64::from(dt.hour()),
        Lookup::Minute => i64::from(dt.minute()),
        Lookup::Second => i64::from(dt.second()),
        _ => return None,
    };
    Some(n)
}

/// A boolean predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Leaf(Condition),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Matches everything.
    pub fn all() -> Self {
        Predicate::And(Vec::new())
    }

    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Leaf(Condition {
            field: field.into(),
            lookup: Lookup::Exact,
            value: value.into(),
        })
    }

    /// A leaf from a filter key such as `"name__icontains"`.
    pub fn lookup(key: &str, value: impl Into<Value>) -> Result<Self> {
        let (field, lookup) = Lookup::parse_key(key)?;
        Ok(Predicate::Leaf(Condition {
            field: field.to_string(),
            lookup,
            value: value.into(),
        }))
    }

    /// A flat conjunction of filter-key leaves.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .map(|(k, v)| Predicate::lookup(k.as_ref(), v))
            .collect::<Result<Vec<_>>>()
            .map(Predicate::And)
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut children) => {
                children.push(other);
                Predicate::And(children)
            }
            leaf => Predicate::And(vec![leaf, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut children) => {
                children.push(other);
                Predicate::Or(children)
            }
            leaf => Predicate::Or(vec![leaf, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluate against a local entity.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Predicate::Leaf(condition) => condition.matches(entity),
            Predicate::And(children) => children.iter().all(|p| p.matches(entity)),
            Predicate::Or(children) => children.iter().any(|p| p.matches(entity)),
            Predicate::Not(inner) => !inner.matches(entity),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Predicate::And(children) if children.is_empty())
    }
}

/// Comparison operators with a direct remote spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateUnit {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateUnit {
    fn as_str(&self) -> &'static str {
        match self {
            DateUnit::Year => "year",
            DateUnit::Month => "month",
            DateUnit::Day => "day",
            DateUnit::Hour => "hour",
            DateUnit::Minute => "minute",
            DateUnit::Second => "second",
        }
    }
}

/// The supported remote filter shapes. Field names are remote names and
/// literals are already rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteClause {
    Equality {
        field: String,
        literal: String,
    },
    Comparison {
        field: String,
        op: CompareOp,
        literal: String,
    },
    StringMatch {
        field: String,
        kind: MatchKind,
        literal: String,
    },
    DateComponent {
        field: String,
        unit: DateUnit,
        literal: String,
    },
    Reference {
        field: String,
        remote_id: String,
    },
}

impl RemoteClause {
    /// Resolve a leaf through the entity mapping.
    pub fn resolve(mapping: &EntityMapping, condition: &Condition) -> Result<Self> {
        let spec = mapping.get_remote_field(&condition.field).map_err(|_| {
            Error::unsupported(format!(
                "filter on unmapped field '{}' of {}",
                condition.field, mapping.entity_type
            ))
        })?;
        let field = spec.remote.to_string();

        if spec.codec.is_reference() {
            return Self::resolve_reference(field, spec.codec, condition);
        }

        let literal = format_literal(&condition.value)?;
        let clause = match condition.lookup {
            Lookup::Exact | Lookup::IExact => RemoteClause::Equality { field, literal },
            Lookup::Lt => comparison(field, CompareOp::Lt, literal),
            Lookup::Lte => comparison(field, CompareOp::Le, literal),
            Lookup::Gt => comparison(field, CompareOp::Gt, literal),
            Lookup::Gte => comparison(field, CompareOp::Ge, literal),
            Lookup::Contains | Lookup::IContains => string_match(field, MatchKind::Contains, literal),
            Lookup::StartsWith | Lookup::IStartsWith => {
                string_match(field, MatchKind::StartsWith, literal)
            }
            Lookup::EndsWith | Lookup::IEndsWith => string_match(field, MatchKind::EndsWith, literal),
            Lookup::Year => date_part(field, DateUnit::Year, literal),
            Lookup::Month => date_part(field, DateUnit::Month, literal),
            Lookup::Day => date_part(field, DateUnit::Day, literal),
            Lookup::Hour => date_part(field, DateUnit::Hour, literal),
            Lookup::Minute => date_part(field, DateUnit::Minute, literal),
            Lookup::Second => date_part(field, DateUnit::Second, literal),
        };
        Ok(clause)
    }

    fn resolve_reference(field: String, codec: Codec, condition: &Condition) -> Result<Self> {
        if !matches!(condition.lookup, Lookup::Exact | Lookup::IExact) {
            return Err(Error::unsupported(format!(
                "'{}' lookup on reference field '{}'",
                condition.lookup, condition.field
            )));
        }

        let remote_id = match (&condition.value, codec) {
            (Value::Ref(r), Codec::ObjectRef { .. }) => r.remote_id.clone(),
            (Value::String(id), _) => id.clone(),
            (other, _) => {
                return Err(Error::unsupported(format!(
                    "{} value for reference field '{}'",
                    other.type_name(),
                    condition.field
                )))
            }
        };

        if remote_id.is_empty() {
            return Err(Error::unsupported(format!(
                "reference filter on '{}' without a remote id",
                condition.field
            )));
        }
        Ok(RemoteClause::Reference { field, remote_id })
    }

    /// Render as a remote filter expression.
    pub fn render(&self) -> String {
        match self {
            RemoteClause::Equality { field, literal } => format!("{field} eq {literal}"),
            RemoteClause::Comparison { field, op, literal } => {
                format!("{field} {} {literal}", op.as_str())
            }
            RemoteClause::StringMatch {
                field,
                kind,
                literal,
            } => match kind {
                MatchKind::Contains => format!("substringof({literal},{field})"),
                MatchKind::StartsWith => format!("startswith({field},{literal})"),
                MatchKind::EndsWith => format!("endswith({field},{literal})"),
            },
            RemoteClause::DateComponent {
                field,
                unit,
                literal,
            } => format!("{}({field}) eq {literal}", unit.as_str()),
            RemoteClause::Reference { field, remote_id } => {
                format!("{field}/Id eq '{remote_id}'")
            }
        }
    }
}

fn comparison(field: String, op: CompareOp, literal: String) -> RemoteClause {
    RemoteClause::Comparison { field, op, literal }
}

fn string_match(field: String, kind: MatchKind, literal: String) -> RemoteClause {
    RemoteClause::StringMatch {
        field,
        kind,
        literal,
    }
}

fn date_part(field: String, unit: DateUnit, literal: String) -> RemoteClause {
    RemoteClause::DateComponent {
        field,
        unit,
        literal,
    }
}

/// Render a filter value as a remote literal.
///
/// Numbers and booleans are bare, timestamps use `datetime'...'` at whole
/// seconds, everything else is single-quoted without escaping.
pub fn format_literal(value: &Value) -> Result<String> {
    match value {
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::DateTime(dt) => Ok(format!("datetime'{}'", dt.format("%Y-%m-%dT%H:%M:%S"))),
        Value::String(s) => Ok(format!("'{s}'")),
        Value::Null => Err(Error::unsupported("None-valued filter")),
        Value::Ref(_) => Err(Error::unsupported("reference value on a plain field")),
    }
}

/// Translate a predicate into ANDed remote filter expressions.
///
/// Accepts a single leaf or one flat conjunction of leaves.
pub fn translate(mapping: &EntityMapping, predicate: &Predicate) -> Result<Vec<String>> {
    let leaves: Vec<&Condition> = match predicate {
        Predicate::Leaf(condition) => vec![condition],
        Predicate::And(children) => children
            .iter()
            .map(|child| match child {
                Predicate::Leaf(condition) => Ok(condition),
                _ => Err(Error::unsupported("nested predicate inside a conjunction")),
            })
            .collect::<Result<_>>()?,
        Predicate::Or(_) => return Err(Error::unsupported("OR predicate")),
        Predicate::Not(_) => return Err(Error::unsupported("negated predicate")),
    };

    leaves
        .into_iter()
        .map(|condition| RemoteClause::resolve(mapping, condition).map(|c| c.render()))
        .collect()
}

/// A query on the synced path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    predicate: Option<Predicate>,
    known: KnownRelated,
}

impl Query {
    /// Every object of the type.
    pub fn all() -> Self {
        Self::default()
    }

    /// Shorthand for `Query::all().filter(predicate)`.
    pub fn filtered(predicate: Predicate) -> Result<Self> {
        Self::all().filter(predicate)
    }

    /// Restrict the query. A query can be filtered only once.
    pub fn filter(mut self, predicate: Predicate) -> Result<Self> {
        if self.predicate.is_some() {
            return Err(Error::unsupported("chained filter"));
        }
        self.predicate = Some(predicate);
        Ok(self)
    }

    /// Decode references through `field` to `related` instead of a stub.
    pub fn with_known_related(mut self, field: impl Into<String>, related: EntityRef) -> Self {
        self.known.insert(field, related);
        self
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn known_related(&self) -> &KnownRelated {
        &self.known
    }

    /// Remote filter expressions for this query.
    pub fn remote_filters(&self, mapping: &EntityMapping) -> Result<Vec<String>> {
        match &self.predicate {
            None => Ok(Vec::new()),
            Some(predicate) => translate(mapping, predicate),
        }
    }

    /// The equivalent local query.
    pub fn to_local(&self, entity_type: impl Into<String>) -> LocalQuery {
        let query = LocalQuery::new(entity_type);
        match &self.predicate {
            None => query,
            Some(predicate) => query.filter(predicate.clone()),
        }
    }
}

/// Sort key of a local query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A query against the local store only.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalQuery {
    pub entity_type: String,
    pub predicate: Predicate,
    pub excludes: Vec<Predicate>,
    pub order: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl LocalQuery {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            predicate: Predicate::all(),
            excludes: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Add a condition; repeated calls are ANDed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = if self.predicate.is_all() {
            predicate
        } else {
            self.predicate.and(predicate)
        };
        self
    }

    /// Drop rows matching `predicate`.
    pub fn exclude(mut self, predicate: Predicate) -> Self {
        self.excludes.push(predicate);
        self
    }

    /// Sort by `field`; a leading `-` sorts descending.
    pub fn order_by(mut self, field: &str) -> Self {
        let (field, descending) = match field.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (field, false),
        };
        self.order.push(OrderBy {
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn is_ordered(&self) -> bool {
        !self.order.is_empty()
    }

    /// Whether an entity passes the filter and none of the exclusions.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.entity_type == self.entity_type
            && self.predicate.matches(entity)
            && !self.excludes.iter().any(|p| p.matches(entity))
    }

    /// Sort rows and apply the limit.
    ///
    /// Without an explicit order, rows keep their incoming order.
    pub fn arrange(&self, rows: &mut Vec<Entity>) {
        if self.is_ordered() {
            rows.sort_by(|a, b| {
                for key in &self.order {
                    let left = a.column(&key.field).unwrap_or(Value::Null);
                    let right = b.column(&key.field).unwrap_or(Value::Null);
                    let ord = null_first(&left, &right);
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
    }
}

fn null_first(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}
