//! # crmsync-sync
//!
//! Reconciliation of local records against a remote CRM.
//!
//! Build a [`Reconciler`] over a [`RemoteDirectory`] and a [`RemoteIdStore`],
//! then call [`Reconciler::reconcile`] for one record, [`pipeline::run`] for
//! many, or [`run_job`] from a queue.

pub mod directory;
pub mod error;
pub mod job;
pub mod ledger;
pub mod matching;
pub mod pipeline;
pub mod reconciler;
pub mod retry;
pub mod schema;

pub use directory::{Association, AssociationType, RemoteDirectory, SearchFilter, SearchOperator};
pub use error::{DirectoryError, Failure, SyncError};
pub use job::{run_job, JobDisposition, SyncJob};
pub use ledger::{Ledger, LedgerEntry, RemoteIdStore};
pub use pipeline::{PipelineOptions, PipelineReport, RecordResult};
pub use reconciler::{CompanyLink, Operation, Reconciler, SyncOutcome};
pub use retry::{classify, RetryDecision, RetryPolicy};
pub use schema::{GroupStatus, PropertyDefinition, PropertySchema, SchemaReport};
