//! Remote directory abstraction.
//!
//! [`RemoteDirectory`] is the API surface the reconciler needs. Lookups
//! return `Option`; a stale id on update is `Ok(None)`. The HTTP
//! implementation lives in the CLI crate; tests use in-memory fakes.

use std::sync::Arc;

use crmsync_core::{RecordKind, RemoteId, RemoteProperties, RemoteRecord};

use crate::error::DirectoryError;

/// Search operator supported by [`SearchFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOperator {
    /// Exact (case-insensitive) equality.
    Eq,
    /// Matches records whose property contains the value as a whole token.
    ContainsToken,
}

/// One-property search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub property: String,
    pub operator: SearchOperator,
    pub value: String,
}

impl SearchFilter {
    pub fn eq(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            operator: SearchOperator::Eq,
            value: value.into(),
        }
    }

    pub fn contains_token(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            operator: SearchOperator::ContainsToken,
            value: value.into(),
        }
    }
}

/// Association label between two records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AssociationType {
    /// The remote's default (unlabeled) association.
    #[default]
    Default,
    /// An explicit association definition.
    Typed { category: String, type_id: u32 },
}

/// Result of [`RemoteDirectory::associate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    Linked,
    /// The target record does not exist (stale id).
    TargetMissing,
}

/// Remote CRM operations used by the reconciler.
///
/// Every method may fail with [`DirectoryError::RateLimited`], which callers
/// must propagate.
pub trait RemoteDirectory: Send + Sync {
    fn get_by_id(
        &self,
        kind: RecordKind,
        id: &RemoteId,
    ) -> Result<Option<RemoteRecord>, DirectoryError>;

    fn get_by_natural_key(
        &self,
        kind: RecordKind,
        property: &str,
        value: &str,
    ) -> Result<Option<RemoteRecord>, DirectoryError>;

    /// Fails with `Conflict` when the natural key is taken and `Validation`
    /// when the payload is rejected.
    fn create(
        &self,
        kind: RecordKind,
        properties: &RemoteProperties,
    ) -> Result<RemoteRecord, DirectoryError>;

    /// `Ok(None)` when `id` no longer exists.
    fn update(
        &self,
        kind: RecordKind,
        id: &RemoteId,
        properties: &RemoteProperties,
    ) -> Result<Option<RemoteRecord>, DirectoryError>;

    fn search(
        &self,
        kind: RecordKind,
        filter: &SearchFilter,
    ) -> Result<Vec<RemoteRecord>, DirectoryError>;

    /// Idempotent: linking an already linked pair returns `Linked`.
    fn associate(
        &self,
        from_kind: RecordKind,
        from_id: &RemoteId,
        to_kind: RecordKind,
        to_id: &RemoteId,
        association: &AssociationType,
    ) -> Result<Association, DirectoryError>;
}

impl<T: RemoteDirectory + ?Sized> RemoteDirectory for Arc<T> {
    fn get_by_id(
        &self,
        kind: RecordKind,
        id: &RemoteId,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        (**self).get_by_id(kind, id)
    }

    fn get_by_natural_key(
        &self,
        kind: RecordKind,
        property: &str,
        value: &str,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        (**self).get_by_natural_key(kind, property, value)
    }

    fn create(
        &self,
        kind: RecordKind,
        properties: &RemoteProperties,
    ) -> Result<RemoteRecord, DirectoryError> {
        (**self).create(kind, properties)
    }

    fn update(
        &self,
        kind: RecordKind,
        id: &RemoteId,
        properties: &RemoteProperties,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        (**self).update(kind, id, properties)
    }

    fn search(
        &self,
        kind: RecordKind,
        filter: &SearchFilter,
    ) -> Result<Vec<RemoteRecord>, DirectoryError> {
        (**self).search(kind, filter)
    }

    fn associate(
        &self,
        from_kind: RecordKind,
        from_id: &RemoteId,
        to_kind: RecordKind,
        to_id: &RemoteId,
        association: &AssociationType,
    ) -> Result<Association, DirectoryError> {
        (**self).associate(from_kind, from_id, to_kind, to_id, association)
    }
}
