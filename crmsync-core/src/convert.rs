//! Local value → remote string property conversion.
//!
//! The remote CRM accepts only string property values. [`convert_value`]
//! turns one [`LocalValue`] into its wire string (or `None` to omit it) and
//! [`convert_properties`] does the same for a whole raw property set, always
//! finishing with the [`RemoteProperties::from_values`] check.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConversionError, InvalidProperty};
use crate::value::{iso8601, FieldMap, LocalValue};

const SEQUENCE_SEPARATOR: &str = ", ";
const PREFERRED_LOCALE: &str = "en";

// ---------------------------------------------------------------------------
// RemoteProperties
// ---------------------------------------------------------------------------

/// Validated, insertion-ordered remote property set. Every value is a
/// non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct RemoteProperties(Vec<(String, String)>);

impl RemoteProperties {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a property set from already-converted values.
    ///
    /// Nulls and empty strings are dropped. Any other non-string value is
    /// collected and reported in a single [`ConversionError::InvalidPropertyType`].
    pub fn from_values<I, K>(values: I) -> Result<Self, ConversionError>
    where
        I: IntoIterator<Item = (K, LocalValue)>,
        K: Into<String>,
    {
        let mut props = RemoteProperties::new();
        let mut invalid = Vec::new();

        for (key, value) in values {
            let key = key.into();
            match value {
                LocalValue::Null => {}
                LocalValue::Text(text) => props.insert(key, text),
                other => invalid.push(InvalidProperty {
                    key,
                    kind: other.kind_name(),
                    type_name: other.type_name().map(str::to_owned),
                }),
            }
        }

        if invalid.is_empty() {
            Ok(props)
        } else {
            Err(ConversionError::InvalidPropertyType(invalid))
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace. Empty values are ignored.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            return;
        }
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RemoteProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = RemoteProperties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

/// Remote responses may carry `null` or numeric property values; nulls are
/// dropped and everything else is kept in its JSON text form.
impl From<Map<String, Value>> for RemoteProperties {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter()
            .filter_map(|(k, v)| match v {
                Value::Null => None,
                Value::String(s) => Some((k, s)),
                other => Some((k, other.to_string())),
            })
            .collect()
    }
}

impl From<RemoteProperties> for Map<String, Value> {
    fn from(props: RemoteProperties) -> Self {
        props
            .0
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert one local value to its wire string. `Ok(None)` means "omit".
///
/// `property` is only used to name the property in error reports.
pub fn convert_value(value: &LocalValue, property: &str) -> Result<Option<String>, ConversionError> {
    let converted = match value {
        LocalValue::Null => None,
        LocalValue::Timestamp(ts) => Some(iso8601(ts)),
        LocalValue::Sequence(items) if items.is_empty() => None,
        LocalValue::Mapping(fields) if fields.is_empty() => None,
        LocalValue::Sequence(items) => Some(join_scalars(items.iter())),
        LocalValue::Mapping(fields) if fields.is_indexed() => Some(join_scalars(fields.values())),
        LocalValue::Mapping(fields) => return convert_value(translated(fields), property),
        LocalValue::StringLike { text, .. } => Some(text.clone()),
        LocalValue::StructLike { fields, .. } => {
            Some(LocalValue::Mapping(fields.clone()).to_plain_json().to_string())
        }
        LocalValue::Opaque { type_name } => {
            return Err(ConversionError::UnconvertibleValue {
                property: property.to_owned(),
                kind: value.kind_name(),
                type_name: type_name.clone(),
            })
        }
        LocalValue::Bool(_) | LocalValue::Int(_) | LocalValue::Float(_) | LocalValue::Text(_) => {
            scalar_text(value)
        }
    };

    Ok(converted.filter(|s| !s.is_empty()))
}

/// Convert every raw value and validate the result.
pub fn convert_properties(raw: &FieldMap) -> Result<RemoteProperties, ConversionError> {
    let mut converted = Vec::with_capacity(raw.len());
    for (key, value) in raw.iter() {
        let value = match convert_value(value, key)? {
            Some(text) => LocalValue::Text(text),
            None => LocalValue::Null,
        };
        converted.push((key.clone(), value));
    }
    RemoteProperties::from_values(converted)
}

/// Translatable field: the `en` entry when present and non-null, else the
/// first entry.
fn translated(fields: &FieldMap) -> &LocalValue {
    match fields.get(PREFERRED_LOCALE) {
        Some(v) if !v.is_null() => v,
        _ => fields.values().next().unwrap_or(&LocalValue::Null),
    }
}

fn join_scalars<'a>(items: impl Iterator<Item = &'a LocalValue>) -> String {
    items
        .filter_map(scalar_text)
        .collect::<Vec<_>>()
        .join(SEQUENCE_SEPARATOR)
}

fn scalar_text(value: &LocalValue) -> Option<String> {
    match value {
        LocalValue::Bool(b) => Some(b.to_string()),
        LocalValue::Int(i) => Some(i.to_string()),
        LocalValue::Float(f) => Some(f.to_string()),
        LocalValue::Text(s) => Some(s.clone()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
