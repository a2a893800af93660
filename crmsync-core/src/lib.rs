//! crmsync core library: data model, conversion, mapping, configuration.
//!
//! - [`value`]: [`LocalValue`] sum type and its JSON boundary
//! - [`convert`]: local value → remote string property conversion
//! - [`snapshot`]: [`RecordSnapshot`] and [`PropertyMap`]
//! - [`mapper`]: property map resolution against a snapshot
//! - [`config`]: [`SyncConfig`] load / save / init
//! - [`error`]: [`ConversionError`], [`ConfigError`], [`SnapshotError`]

pub mod config;
pub mod convert;
pub mod error;
pub mod mapper;
pub mod snapshot;
pub mod types;
pub mod value;

pub use config::{QueueConfig, SyncConfig};
pub use convert::{convert_properties, convert_value, RemoteProperties};
pub use error::{ConfigError, ConversionError, InvalidProperty, SnapshotError};
pub use snapshot::{load_snapshots, parse_snapshots, PropertyMap, RecordSnapshot};
pub use types::{EntityType, LocalId, MapVariant, RecordKind, RemoteId, RemoteRecord};
pub use value::{FieldMap, LocalValue};
