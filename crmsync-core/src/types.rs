//! Domain types shared by the sync engine and its collaborators.
//!
//! Identifiers are newtypes over `String`; the remote system treats ids as
//! opaque strings even when they look numeric.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::convert::RemoteProperties;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a record in the owning application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LocalId(pub String);

impl<'de> Deserialize<'de> for LocalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        id_string(deserializer).map(Self)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for LocalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LocalId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier assigned by the remote CRM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        id_string(deserializer).map(Self)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RemoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of the local storage type a record belongs to (`user`, `organization`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub String);

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Ids arrive as JSON strings or integers; both are kept as strings.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Signed(n) => n.to_string(),
        RawId::Unsigned(n) => n.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The kind of remote object a local record mirrors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Contact,
    Company,
}

impl RecordKind {
    /// Remote property used as the natural key.
    pub fn natural_key_property(self) -> &'static str {
        match self {
            RecordKind::Contact => "email",
            RecordKind::Company => "name",
        }
    }

    /// Local attribute path read for the natural key when a snapshot names none.
    pub fn default_natural_key_path(self) -> &'static str {
        self.natural_key_property()
    }

    /// Plural object segment used by the REST API.
    pub fn object_type(self) -> &'static str {
        match self {
            RecordKind::Contact => "contacts",
            RecordKind::Company => "companies",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Contact => write!(f, "contact"),
            RecordKind::Company => write!(f, "company"),
        }
    }
}

/// Which property map a payload was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapVariant {
    /// The full map, used on create.
    Create,
    /// The update map when present and non-empty, else the full map.
    Update,
}

impl fmt::Display for MapVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapVariant::Create => write!(f, "create"),
            MapVariant::Update => write!(f, "update"),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote records
// ---------------------------------------------------------------------------

/// A record as returned by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RemoteId,
    #[serde(default)]
    pub properties: RemoteProperties,
}

impl RemoteRecord {
    pub fn new(id: impl Into<RemoteId>, properties: RemoteProperties) -> Self {
        Self {
            id: id.into(),
            properties,
        }
    }

    /// Value of a remote property, if present.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(LocalId::from("7").to_string(), "7");
        assert_eq!(RemoteId::from("42").to_string(), "42");
        assert_eq!(EntityType::from("user").to_string(), "user");
    }

    #[test]
    fn record_kind_natural_keys() {
        assert_eq!(RecordKind::Contact.natural_key_property(), "email");
        assert_eq!(RecordKind::Company.natural_key_property(), "name");
        assert_eq!(RecordKind::Company.object_type(), "companies");
    }

    #[test]
    fn record_kind_serde_lowercase() {
        let json = serde_json::to_string(&RecordKind::Company).expect("serialize");
        assert_eq!(json, "\"company\"");
        let kind: RecordKind = serde_json::from_str("\"contact\"").expect("deserialize");
        assert_eq!(kind, RecordKind::Contact);
    }

    #[test]
    fn remote_id_is_transparent_string() {
        let id: RemoteId = serde_json::from_str("\"501\"").expect("deserialize");
        assert_eq!(id, RemoteId::from("501"));
    }

    #[test]
    fn numeric_ids_decode_as_strings() {
        let local: LocalId = serde_json::from_str("7").expect("deserialize");
        assert_eq!(local, LocalId::from("7"));
        let remote: RemoteId = serde_json::from_str("12345678901").expect("deserialize");
        assert_eq!(remote.to_string(), "12345678901");
    }
}
