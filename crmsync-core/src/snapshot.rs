//! Record snapshots: the serialized form in which the owning application
//! hands a local record to the sync engine.
//!
//! Field names are accepted in `snake_case` or in the application's
//! `camelCase` (`localId`, `remoteId`, `propertyMap`, `updatePropertyMap`,
//! `dynamicProperties`, `companyRelation`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{io_err, SnapshotError};
use crate::types::{EntityType, LocalId, RecordKind, RemoteId};
use crate::value::FieldMap;

// ---------------------------------------------------------------------------
// PropertyMap
// ---------------------------------------------------------------------------

/// Ordered mapping remote property name → local attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct PropertyMap(Vec<(String, String)>);

impl PropertyMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append an entry. Replaces the path of an existing remote name.
    pub fn insert(&mut self, remote: impl Into<String>, path: impl Into<String>) {
        let remote = remote.into();
        let path = path.into();
        match self.0.iter_mut().find(|(k, _)| *k == remote) {
            Some(slot) => slot.1 = path,
            None => self.0.push((remote, path)),
        }
    }

    /// `(remote name, local path)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn remote_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = PropertyMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl TryFrom<Map<String, Value>> for PropertyMap {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut entries = Vec::with_capacity(map.len());
        for (remote, path) in map {
            match path {
                Value::String(p) if !p.trim().is_empty() => entries.push((remote, p)),
                Value::String(_) => {
                    return Err(format!("property map entry `{remote}` has an empty path"))
                }
                other => {
                    return Err(format!(
                        "property map entry `{remote}` must be a path string, got {other}"
                    ))
                }
            }
        }
        Ok(Self(entries))
    }
}

impl From<PropertyMap> for Map<String, Value> {
    fn from(map: PropertyMap) -> Self {
        map.0
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// RecordSnapshot
// ---------------------------------------------------------------------------

/// A local contact or company as seen by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    #[serde(alias = "localId")]
    pub local_id: LocalId,

    /// Local storage type (`user`, `organization`). Companies may omit it and
    /// have it filled from `company_entity_types`.
    #[serde(default, alias = "entityType", skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityType>,

    #[serde(default)]
    pub kind: RecordKind,

    #[serde(default, alias = "remoteId", skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,

    /// Attribute path of the natural key; defaults per [`RecordKind`].
    #[serde(default, alias = "naturalKey", skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,

    #[serde(default)]
    pub attributes: FieldMap,

    #[serde(alias = "propertyMap")]
    pub property_map: PropertyMap,

    #[serde(default, alias = "updatePropertyMap", skip_serializing_if = "Option::is_none")]
    pub update_property_map: Option<PropertyMap>,

    #[serde(default, alias = "dynamicProperties", skip_serializing_if = "Option::is_none")]
    pub dynamic_properties: Option<FieldMap>,

    #[serde(default, alias = "companyRelation", skip_serializing_if = "Option::is_none")]
    pub company: Option<Box<RecordSnapshot>>,
}

impl RecordSnapshot {
    pub fn new(local_id: impl Into<LocalId>, kind: RecordKind, property_map: PropertyMap) -> Self {
        Self {
            local_id: local_id.into(),
            entity_type: None,
            kind,
            remote_id: None,
            natural_key: None,
            attributes: FieldMap::new(),
            property_map,
            update_property_map: None,
            dynamic_properties: None,
            company: None,
        }
    }

    /// Attribute path read for the natural key.
    pub fn natural_key_path(&self) -> &str {
        self.natural_key
            .as_deref()
            .unwrap_or_else(|| self.kind.default_natural_key_path())
    }

    /// Entity type, falling back to the record kind name.
    pub fn resolved_entity_type(&self) -> EntityType {
        self.entity_type
            .clone()
            .unwrap_or_else(|| EntityType::from(self.kind.to_string()))
    }

    /// Key identifying this record in the ledger: `<entity_type>:<local_id>`.
    pub fn ledger_key(&self) -> String {
        format!("{}:{}", self.resolved_entity_type(), self.local_id)
    }

    /// Fill a related company's missing entity type from the explicit
    /// contact-type → company-type mapping.
    pub fn apply_company_entity_types(&mut self, mapping: &BTreeMap<String, String>) {
        let Some(contact_type) = self.entity_type.as_ref() else {
            return;
        };
        if let Some(company) = self.company.as_deref_mut() {
            if company.entity_type.is_none() {
                company.entity_type = mapping.get(&contact_type.0).cloned().map(EntityType::from);
            }
        }
    }

    /// Relations are always companies, and only contacts carry them.
    fn normalize(&mut self) -> Result<(), SnapshotError> {
        if let Some(company) = self.company.as_deref_mut() {
            if self.kind == RecordKind::Company {
                return Err(SnapshotError::Invalid {
                    local_id: self.local_id.to_string(),
                    reason: "a company cannot carry a company relation".to_owned(),
                });
            }
            company.kind = RecordKind::Company;
            company.normalize()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Parse one snapshot object or an array of them.
pub fn parse_snapshots(json: &str) -> Result<Vec<RecordSnapshot>, SnapshotError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<RecordSnapshot>),
        One(Box<RecordSnapshot>),
    }

    let mut snapshots = match serde_json::from_str::<OneOrMany>(json) {
        Ok(OneOrMany::Many(all)) => all,
        Ok(OneOrMany::One(one)) => vec![*one],
        // Re-decode as a single record so the error names the real defect
        // instead of serde's generic untagged-enum message.
        Err(_) => vec![serde_json::from_str::<RecordSnapshot>(json)?],
    };
    for snapshot in &mut snapshots {
        snapshot.normalize()?;
    }
    Ok(snapshots)
}

/// Read and parse a snapshot file.
pub fn load_snapshots(path: &Path) -> Result<Vec<RecordSnapshot>, SnapshotError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_snapshots(&contents)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
