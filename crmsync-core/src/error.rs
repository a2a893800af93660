//! Error types for crmsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or saving the sync configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, read-only filesystem, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.crmsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A value in the config file is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Describes one property that survived conversion without becoming a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidProperty {
    pub key: String,
    /// Runtime kind of the offending value (`"sequence"`, `"bool"`, ...).
    pub kind: &'static str,
    /// Type name for structured values.
    pub type_name: Option<String>,
}

/// Errors raised while turning local values into remote string properties.
///
/// Both variants are data-shape defects: retrying with the same input
/// produces the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// A structured value exposes neither a string form nor a field mapping.
    #[error(
        "cannot convert {kind} value of type {type_name} for property `{property}`; \
         structured values need a string form or a field mapping"
    )]
    UnconvertibleValue {
        property: String,
        kind: &'static str,
        type_name: String,
    },

    /// Properties must be strings after conversion.
    #[error("properties must be strings after conversion; invalid: {}", describe_invalid(.0))]
    InvalidPropertyType(Vec<InvalidProperty>),
}

fn describe_invalid(invalid: &[InvalidProperty]) -> String {
    invalid
        .iter()
        .map(|p| match &p.type_name {
            Some(name) => format!("{} ({}: {name})", p.key, p.kind),
            None => format!("{} ({})", p.key, p.kind),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while decoding a record snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot document is not valid JSON for the expected shape.
    #[error("invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot decoded but describes an impossible record.
    #[error("invalid snapshot for local id {local_id}: {reason}")]
    Invalid { local_id: String, reason: String },

    /// The snapshot file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Wrap an I/O error with the path it concerns.
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.into(),
        source,
    }
}
