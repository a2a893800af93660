//! Queue job contract.
//!
//! A queue runs [`run_job`] for each [`SyncJob`] and acts on the returned
//! [`JobDisposition`]: drop it, release it back onto the queue after a
//! delay, or record it as permanently failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crmsync_core::{RecordSnapshot, RemoteProperties};

use crate::directory::RemoteDirectory;
use crate::error::SyncError;
use crate::reconciler::{Reconciler, SyncOutcome};
use crate::retry::{classify, RetryDecision, RetryPolicy};

/// One queued sync of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    pub record: RecordSnapshot,
    /// 1-based number of the attempt about to run.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl SyncJob {
    pub fn new(record: RecordSnapshot) -> Self {
        Self { record, attempt: 1 }
    }

    /// The same job, one attempt later.
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }

    /// Short label used in log lines.
    pub fn label(&self) -> String {
        format!("sync {} {}", self.record.kind, self.record.ledger_key())
    }
}

/// What the queue should do with a job after running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    Completed(Box<SyncOutcome>),
    /// Sync is disabled by configuration.
    Skipped,
    /// Put the job back and retry after the delay.
    Release { after: Duration },
    Failed { reason: String },
}

/// Run one attempt of `job` and decide its fate.
pub fn run_job<D: RemoteDirectory + ?Sized>(
    reconciler: &Reconciler<'_, D>,
    job: &SyncJob,
    policy: &RetryPolicy,
) -> JobDisposition {
    if reconciler.config().disabled {
        tracing::debug!("{}: sync disabled, skipping", job.label());
        return JobDisposition::Skipped;
    }

    let err = match reconciler.reconcile(&job.record) {
        Ok(outcome) => {
            tracing::info!(
                "{}: {:?} remote id {} (attempt {})",
                job.label(),
                outcome.operation,
                outcome.remote_id,
                job.attempt
            );
            return JobDisposition::Completed(Box::new(outcome));
        }
        Err(err) => err,
    };

    log_failure(job, &err);
    match classify(&err, job.attempt, policy) {
        RetryDecision::Retry { after } => {
            tracing::warn!(
                "{}: attempt {} failed, releasing for {}s: {err}",
                job.label(),
                job.attempt,
                after.as_secs()
            );
            JobDisposition::Release { after }
        }
        RetryDecision::Fatal { reason, exhausted } => {
            tracing::error!(
                "{} permanently failed (local_id={}, entity_type={}, attempts={}, exhausted={exhausted}): {reason}",
                job.label(),
                job.record.local_id,
                job.record.resolved_entity_type(),
                job.attempt
            );
            JobDisposition::Failed { reason }
        }
    }
}

fn log_failure(job: &SyncJob, err: &SyncError) {
    match err {
        SyncError::Validation {
            properties,
            variant,
            message,
            ..
        } => tracing::error!(
            "{} failed: local_id={} entity_type={} map={variant} error={message} properties={}",
            job.label(),
            job.record.local_id,
            job.record.resolved_entity_type(),
            describe(properties)
        ),
        other => tracing::error!(
            "{} failed: local_id={} entity_type={} attempt={} error={other}",
            job.label(),
            job.record.local_id,
            job.record.resolved_entity_type(),
            job.attempt
        ),
    }
}

fn describe(properties: &RemoteProperties) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}
