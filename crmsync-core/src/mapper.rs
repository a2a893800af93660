//! Record mapping: resolve a snapshot's property map against its attributes.
//!
//! The output of [`map_properties`] is the raw remote-name → local-value set;
//! [`build_properties`] runs it through the converter.

use crate::convert::{convert_properties, convert_value, RemoteProperties};
use crate::error::ConversionError;
use crate::snapshot::{PropertyMap, RecordSnapshot};
use crate::types::MapVariant;
use crate::value::{FieldMap, LocalValue};

const PATH_SEPARATOR: char = '.';

/// Look up an attribute path. Dotted paths walk mappings, struct fields and
/// numeric sequence indices. A missing segment yields `None`.
pub fn resolve_path<'a>(attributes: &'a FieldMap, path: &str) -> Option<&'a LocalValue> {
    if !path.contains(PATH_SEPARATOR) {
        return attributes.get(path);
    }
    let mut segments = path.split(PATH_SEPARATOR);
    let first = segments.next()?;
    segments.try_fold(attributes.get(first)?, |value, segment| value.child(segment))
}

/// The property map used for `variant`. Updates fall back to the full map
/// when no update map is set or it is empty.
pub fn select_map(snapshot: &RecordSnapshot, variant: MapVariant) -> &PropertyMap {
    match (variant, snapshot.update_property_map.as_ref()) {
        (MapVariant::Update, Some(update)) if !update.is_empty() => update,
        _ => &snapshot.property_map,
    }
}

/// Raw remote-name → value set for `variant`, with dynamic properties merged.
///
/// Null and unresolvable paths are left out. A dynamic property never
/// replaces a mapped key that produced a value.
pub fn map_properties(snapshot: &RecordSnapshot, variant: MapVariant) -> FieldMap {
    let mut raw = FieldMap::new();

    for (remote, path) in select_map(snapshot, variant).iter() {
        match resolve_path(&snapshot.attributes, path) {
            Some(value) if !value.is_null() => raw.insert(remote, value.clone()),
            _ => {}
        }
    }

    if let Some(dynamic) = &snapshot.dynamic_properties {
        for (key, value) in dynamic.iter() {
            if value.is_null() || raw.contains_key(key) {
                continue;
            }
            raw.insert(key.clone(), value.clone());
        }
    }

    raw
}

/// Mapped and converted remote properties for `variant`.
pub fn build_properties(
    snapshot: &RecordSnapshot,
    variant: MapVariant,
) -> Result<RemoteProperties, ConversionError> {
    convert_properties(&map_properties(snapshot, variant))
}

/// The record's natural-key value in wire form, if it has one.
pub fn natural_key(snapshot: &RecordSnapshot) -> Result<Option<String>, ConversionError> {
    let path = snapshot.natural_key_path();
    match resolve_path(&snapshot.attributes, path) {
        Some(value) => convert_value(value, snapshot.kind.natural_key_property()),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
