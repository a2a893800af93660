//! Remote property schema sync.
//!
//! Ensures the configured property group exists and creates every mapped
//! property the remote does not know yet, as a plain text field.

use serde::{Deserialize, Serialize};

use crmsync_core::{RecordKind, RecordSnapshot, SyncConfig};

use crate::error::{DirectoryError, SyncError};

/// A remote property definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub property_type: String,
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl PropertyDefinition {
    /// A `string`/`text` property labeled with its own name.
    pub fn text(name: impl Into<String>, group: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            property_type: "string".to_owned(),
            field_type: "text".to_owned(),
            group_name: Some(group.into()),
        }
    }
}

/// Whether a property group had to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    AlreadyExists,
}

/// Remote property-schema operations.
pub trait PropertySchema: Send + Sync {
    fn list_properties(&self, kind: RecordKind) -> Result<Vec<PropertyDefinition>, DirectoryError>;

    fn create_property_group(
        &self,
        kind: RecordKind,
        name: &str,
        label: &str,
    ) -> Result<GroupStatus, DirectoryError>;

    fn create_properties(
        &self,
        kind: RecordKind,
        properties: &[PropertyDefinition],
    ) -> Result<(), DirectoryError>;
}

/// Result of [`sync_properties`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaReport {
    pub group: GroupStatus,
    /// Properties the records map, in first-seen order.
    pub wanted: Vec<String>,
    pub created: Vec<String>,
}

/// Remote property names mapped by `records` of `kind`: full map, update map
/// and dynamic keys, deduplicated in first-seen order.
pub fn mapped_property_names(records: &[RecordSnapshot], kind: RecordKind) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_owned());
        }
    };

    for record in records.iter().filter(|r| r.kind == kind) {
        record.property_map.remote_names().for_each(&mut push);
        if let Some(update) = &record.update_property_map {
            update.remote_names().for_each(&mut push);
        }
        if let Some(dynamic) = &record.dynamic_properties {
            dynamic.iter().for_each(|(k, _)| push(k.as_str()));
        }
    }
    names
}

/// Create the property group and any of `wanted` missing remotely.
pub fn sync_properties<S: PropertySchema + ?Sized>(
    schema: &S,
    kind: RecordKind,
    wanted: Vec<String>,
    config: &SyncConfig,
) -> Result<SchemaReport, SyncError> {
    let group = match schema.create_property_group(
        kind,
        &config.property_group,
        &config.property_group_label,
    ) {
        Ok(status) => status,
        Err(DirectoryError::Conflict { .. }) => GroupStatus::AlreadyExists,
        Err(e) => return Err(e.into()),
    };
    tracing::info!("{kind} property group {:?}: {group:?}", config.property_group);

    let existing = schema.list_properties(kind)?;
    let missing: Vec<PropertyDefinition> = wanted
        .iter()
        .filter(|name| !existing.iter().any(|p| &p.name == *name))
        .map(|name| PropertyDefinition::text(name.as_str(), config.property_group.as_str()))
        .collect();

    if missing.is_empty() {
        tracing::info!("{kind} properties already exist");
    } else {
        tracing::info!(
            "creating {kind} properties: {}",
            missing.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
        );
        schema.create_properties(kind, &missing)?;
    }

    Ok(SchemaReport {
        group,
        wanted,
        created: missing.into_iter().map(|p| p.name).collect(),
    })
}
