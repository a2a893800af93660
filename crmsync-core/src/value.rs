//! Typed local values.
//!
//! Local records carry heterogeneous attribute values. Each one is classified
//! once, when the snapshot is decoded, into a [`LocalValue`] variant; the
//! converter then matches on the variant instead of probing capabilities.
//!
//! # JSON boundary
//!
//! Plain JSON maps onto `Null`, `Bool`, `Int`, `Float`, `Text`, `Sequence` and
//! `Mapping`. The remaining variants use reserved single-key objects:
//!
//! ```text
//! {"$timestamp": "2024-03-01T10:00:00Z"}
//! {"$string": {"type": "Money", "value": "12.50 EUR"}}
//! {"$struct": {"type": "Address", "fields": {"city": "Oslo"}}}
//! {"$opaque": "Resource"}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

const TIMESTAMP_TAG: &str = "$timestamp";
const STRING_TAG: &str = "$string";
const STRUCT_TAG: &str = "$struct";
const OPAQUE_TAG: &str = "$opaque";

/// A local attribute value, classified at the data-model boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum LocalValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Sequence(Vec<LocalValue>),
    Mapping(FieldMap),
    /// A structured value that knows how to render itself as a string.
    StringLike { type_name: String, text: String },
    /// A structured value that can expose its fields but has no string form.
    StructLike { type_name: String, fields: FieldMap },
    /// A structured value with neither capability.
    Opaque { type_name: String },
}

impl LocalValue {
    pub fn text(s: impl Into<String>) -> Self {
        LocalValue::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, LocalValue::Null)
    }

    /// Scalars are booleans, numbers and text.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            LocalValue::Bool(_) | LocalValue::Int(_) | LocalValue::Float(_) | LocalValue::Text(_)
        )
    }

    /// Short runtime kind name used in error reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            LocalValue::Null => "null",
            LocalValue::Bool(_) => "bool",
            LocalValue::Int(_) => "int",
            LocalValue::Float(_) => "float",
            LocalValue::Text(_) => "string",
            LocalValue::Timestamp(_) => "timestamp",
            LocalValue::Sequence(_) => "sequence",
            LocalValue::Mapping(_) => "mapping",
            LocalValue::StringLike { .. } => "string-like object",
            LocalValue::StructLike { .. } => "struct object",
            LocalValue::Opaque { .. } => "object",
        }
    }

    /// Type name of structured values.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            LocalValue::StringLike { type_name, .. }
            | LocalValue::StructLike { type_name, .. }
            | LocalValue::Opaque { type_name } => Some(type_name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LocalValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Child value for one dotted-path segment.
    ///
    /// Mappings and struct fields are looked up by key; sequences by a
    /// zero-based numeric index.
    pub fn child(&self, segment: &str) -> Option<&LocalValue> {
        match self {
            LocalValue::Mapping(fields) | LocalValue::StructLike { fields, .. } => {
                fields.get(segment)
            }
            LocalValue::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Plain JSON rendering: timestamps become ISO-8601 strings, string-like
    /// values their text, opaque values `null`.
    pub fn to_plain_json(&self) -> Value {
        match self {
            LocalValue::Null | LocalValue::Opaque { .. } => Value::Null,
            LocalValue::Bool(b) => Value::Bool(*b),
            LocalValue::Int(i) => Value::Number((*i).into()),
            LocalValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            LocalValue::Text(s) => Value::String(s.clone()),
            LocalValue::Timestamp(ts) => Value::String(iso8601(ts)),
            LocalValue::Sequence(items) => {
                Value::Array(items.iter().map(LocalValue::to_plain_json).collect())
            }
            LocalValue::Mapping(fields) | LocalValue::StructLike { fields, .. } => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_plain_json()))
                    .collect(),
            ),
            LocalValue::StringLike { text, .. } => Value::String(text.clone()),
        }
    }
}

/// ISO-8601 rendering used on the wire (UTC, millisecond precision).
pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl From<&str> for LocalValue {
    fn from(s: &str) -> Self {
        LocalValue::Text(s.to_owned())
    }
}

impl From<String> for LocalValue {
    fn from(s: String) -> Self {
        LocalValue::Text(s)
    }
}

impl From<bool> for LocalValue {
    fn from(b: bool) -> Self {
        LocalValue::Bool(b)
    }
}

impl From<i64> for LocalValue {
    fn from(i: i64) -> Self {
        LocalValue::Int(i)
    }
}

impl From<f64> for LocalValue {
    fn from(f: f64) -> Self {
        LocalValue::Float(f)
    }
}

impl From<DateTime<Utc>> for LocalValue {
    fn from(ts: DateTime<Utc>) -> Self {
        LocalValue::Timestamp(ts)
    }
}

// ---------------------------------------------------------------------------
// FieldMap
// ---------------------------------------------------------------------------

/// Insertion-ordered string-keyed mapping of local values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct FieldMap(Vec<(String, LocalValue)>);

impl FieldMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&LocalValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace, keeping the original position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<LocalValue>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LocalValue)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &LocalValue> {
        self.0.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the keys are exactly `"0"`, `"1"`, ... in order, i.e. the
    /// mapping is really an indexed list.
    pub fn is_indexed(&self) -> bool {
        self.0
            .iter()
            .enumerate()
            .all(|(i, (k, _))| k.parse::<usize>().map_or(false, |n| n == i))
    }
}

impl<K: Into<String>, V: Into<LocalValue>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl From<Map<String, Value>> for FieldMap {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k, LocalValue::from(v))).collect())
    }
}

impl From<FieldMap> for Map<String, Value> {
    fn from(map: FieldMap) -> Self {
        map.0.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
    }
}

// ---------------------------------------------------------------------------
// JSON boundary
// ---------------------------------------------------------------------------

impl From<Value> for LocalValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => LocalValue::Null,
            Value::Bool(b) => LocalValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => LocalValue::Int(i),
                None => LocalValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => LocalValue::Text(s),
            Value::Array(items) => {
                LocalValue::Sequence(items.into_iter().map(LocalValue::from).collect())
            }
            Value::Object(map) => from_object(map),
        }
    }
}

fn from_object(map: Map<String, Value>) -> LocalValue {
    if map.len() == 1 {
        if let Some(tagged) = from_tagged(&map) {
            return tagged;
        }
    }
    LocalValue::Mapping(FieldMap::from(map))
}

fn from_tagged(map: &Map<String, Value>) -> Option<LocalValue> {
    let (tag, body) = map.iter().next()?;
    match tag.as_str() {
        TIMESTAMP_TAG => {
            let raw = body.as_str()?;
            let ts = DateTime::parse_from_rfc3339(raw).ok()?;
            Some(LocalValue::Timestamp(ts.with_timezone(&Utc)))
        }
        STRING_TAG => Some(LocalValue::StringLike {
            type_name: body.get("type")?.as_str()?.to_owned(),
            text: body.get("value")?.as_str()?.to_owned(),
        }),
        STRUCT_TAG => Some(LocalValue::StructLike {
            type_name: body.get("type")?.as_str()?.to_owned(),
            fields: FieldMap::from(body.get("fields")?.as_object()?.clone()),
        }),
        OPAQUE_TAG => Some(LocalValue::Opaque {
            type_name: body.as_str()?.to_owned(),
        }),
        _ => None,
    }
}

impl From<LocalValue> for Value {
    fn from(value: LocalValue) -> Self {
        match value {
            LocalValue::Null => Value::Null,
            LocalValue::Bool(b) => Value::Bool(b),
            LocalValue::Int(i) => Value::Number(i.into()),
            LocalValue::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
            LocalValue::Text(s) => Value::String(s),
            LocalValue::Timestamp(ts) => tagged(TIMESTAMP_TAG, Value::String(iso8601(&ts))),
            LocalValue::Sequence(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            LocalValue::Mapping(fields) => Value::Object(fields.into()),
            LocalValue::StringLike { type_name, text } => tagged(
                STRING_TAG,
                serde_json::json!({ "type": type_name, "value": text }),
            ),
            LocalValue::StructLike { type_name, fields } => {
                let fields: Map<String, Value> = fields.into();
                tagged(
                    STRUCT_TAG,
                    serde_json::json!({ "type": type_name, "fields": fields }),
                )
            }
            LocalValue::Opaque { type_name } => tagged(OPAQUE_TAG, Value::String(type_name)),
        }
    }
}

fn tagged(tag: &str, body: Value) -> Value {
    let mut map = Map::new();
    map.insert(tag.to_owned(), body);
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
