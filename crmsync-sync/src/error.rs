//! Error types for crmsync-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crmsync_core::{ConversionError, LocalId, MapVariant, RecordKind, RemoteId, RemoteProperties};

use crate::retry::{base_delay, RetryPolicy};

/// Failures reported by a [`RemoteDirectory`](crate::directory::RemoteDirectory)
/// or [`PropertySchema`](crate::schema::PropertySchema) implementation.
///
/// Routine "not found" is not an error; lookups return `Option`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// HTTP 429. Never swallowed; the whole job is retried later.
    #[error("rate limited by remote API{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 409 on create: a record with the same natural key exists.
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        /// Id named by the remote in the conflict message, when present.
        existing_id: Option<RemoteId>,
    },

    /// HTTP 400: the remote rejected the payload.
    #[error("validation rejected by remote: {message}")]
    Validation { message: String },

    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// Connection-level failure (DNS, reset, TLS).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Any other non-success status.
    #[error("remote API error {status}: {message}")]
    Api { status: u16, message: String },
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl DirectoryError {
    /// Whether a later attempt with the same input can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::RateLimited { .. }
            | DirectoryError::Conflict { .. }
            | DirectoryError::Timeout { .. }
            | DirectoryError::Transport { .. } => true,
            DirectoryError::Api { status, .. } => *status >= 500,
            DirectoryError::Validation { .. } => false,
        }
    }
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A local value could not be turned into a remote property.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// The remote rejected the payload built from `variant`.
    #[error("{kind} {local_id} rejected by remote ({variant} map): {message}")]
    Validation {
        kind: RecordKind,
        local_id: LocalId,
        message: String,
        properties: RemoteProperties,
        variant: MapVariant,
    },

    /// Create hit a conflict and the existing record could not be found.
    #[error("{kind} {local_id}: create conflicted but no existing record was found: {message}")]
    UnresolvedConflict {
        kind: RecordKind,
        local_id: LocalId,
        message: String,
    },

    /// The company was still missing after one repair attempt.
    #[error("company {company_id} missing while associating contact {contact_id}")]
    AssociationTargetMissing {
        contact_id: RemoteId,
        company_id: RemoteId,
    },

    /// Any other remote failure.
    #[error("remote directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (ledger).
    #[error("ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Collaborator-facing failure taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Data-shape defect; retrying cannot help.
    Validation(String),
    /// Retry later, after roughly `suggested_delay`.
    Transient {
        reason: String,
        suggested_delay: Duration,
    },
    Fatal(String),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::UnresolvedConflict { .. } | SyncError::AssociationTargetMissing { .. } => {
                true
            }
            SyncError::Directory(e) => e.is_transient(),
            SyncError::Conversion(_)
            | SyncError::Validation { .. }
            | SyncError::Io { .. }
            | SyncError::Json(_) => false,
        }
    }

    /// Map onto [`Failure`] using the default retry delays.
    pub fn failure(&self) -> Failure {
        match self {
            SyncError::Conversion(_)
            | SyncError::Validation { .. }
            | SyncError::Directory(DirectoryError::Validation { .. }) => {
                Failure::Validation(self.to_string())
            }
            e if e.is_transient() => Failure::Transient {
                reason: e.to_string(),
                suggested_delay: base_delay(e, &RetryPolicy::default()),
            },
            e => Failure::Fatal(e.to_string()),
        }
    }
}
