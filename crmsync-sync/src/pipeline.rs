//! Bulk sync pipeline shared by the `sync` command and the worker seed.
//!
//! Records are reconciled one after another with an optional pause between
//! remote calls. A record whose mapped properties hash to the fingerprint
//! stored in the ledger, and whose remote id is known, is skipped unless
//! `force` is set.

use std::time::Duration;

use crmsync_core::{mapper, MapVariant, RecordSnapshot};

use crate::directory::RemoteDirectory;
use crate::error::SyncError;
use crate::ledger::{Ledger, RemoteIdStore};
use crate::reconciler::{Reconciler, SyncOutcome};

/// Options for a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Pause between records.
    pub delay: Duration,
    /// Process at most this many records.
    pub limit: Option<usize>,
    /// Push even when nothing changed since the last sync.
    pub force: bool,
}

/// Per-record result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordResult {
    Synced(Box<SyncOutcome>),
    Unchanged,
    Failed(String),
}

/// Summary of a pipeline run, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub results: Vec<(String, RecordResult)>,
    /// True when configuration disabled syncing and nothing was attempted.
    pub disabled: bool,
}

impl PipelineReport {
    pub fn synced(&self) -> usize {
        self.count(|r| matches!(r, RecordResult::Synced(_)))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|r| matches!(r, RecordResult::Unchanged))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, RecordResult::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&RecordResult) -> bool) -> usize {
        self.results.iter().filter(|(_, r)| pred(r)).count()
    }
}

/// Sync `records` in order.
///
/// Per-record failures are collected in the report. Only ledger persistence
/// errors abort the run.
pub fn run<D: RemoteDirectory + ?Sized>(
    reconciler: &Reconciler<'_, D>,
    ledger: &Ledger,
    records: &[RecordSnapshot],
    options: &PipelineOptions,
) -> Result<PipelineReport, SyncError> {
    let mut report = PipelineReport::default();
    if reconciler.config().disabled {
        tracing::info!("sync disabled by configuration; {} records skipped", records.len());
        report.disabled = true;
        return Ok(report);
    }

    let take = options.limit.unwrap_or(records.len());
    for (index, record) in records.iter().take(take).enumerate() {
        if index > 0 && !options.delay.is_zero() {
            std::thread::sleep(options.delay);
        }
        let key = record.ledger_key();
        let result = sync_record(reconciler, ledger, record, options.force)?;
        if let RecordResult::Failed(reason) = &result {
            tracing::error!("{key}: {reason}");
        }
        report.results.push((key, result));
    }

    tracing::info!(
        "sync finished: {} synced, {} unchanged, {} failed",
        report.synced(),
        report.unchanged(),
        report.failed()
    );
    Ok(report)
}

fn sync_record<D: RemoteDirectory + ?Sized>(
    reconciler: &Reconciler<'_, D>,
    ledger: &Ledger,
    record: &RecordSnapshot,
    force: bool,
) -> Result<RecordResult, SyncError> {
    let properties = match mapper::build_properties(record, MapVariant::Create) {
        Ok(p) => p,
        Err(e) => return Ok(RecordResult::Failed(e.to_string())),
    };

    let known = record.remote_id.is_some() || ledger.stored_remote_id(record).is_some();
    if !force && known && ledger.is_unchanged(record, &properties) {
        tracing::debug!("{}: unchanged, skipping", record.ledger_key());
        return Ok(RecordResult::Unchanged);
    }

    match reconciler.reconcile(record) {
        Ok(outcome) => {
            ledger.record_push(record, &properties)?;
            Ok(RecordResult::Synced(Box::new(outcome)))
        }
        Err(e) => Ok(RecordResult::Failed(e.to_string())),
    }
}
