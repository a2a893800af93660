//! `crmsync sync <file>`: bulk sync of a snapshot file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use crmsync_sync::{
    pipeline, Ledger, Operation, PipelineOptions, PipelineReport, Reconciler, RecordResult,
};
use crmsync_worker::{init_tracing, LogFormat};

use super::{directory, home, load_config, load_records};

/// Arguments for `crmsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// JSON file holding one record snapshot or an array of them.
    pub file: PathBuf,

    /// Seconds to wait between records.
    #[arg(long, default_value_t = 0)]
    pub delay: u64,

    /// Process at most this many records.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Push records even when nothing changed since the last sync.
    #[arg(long)]
    pub force: bool,

    /// Emit the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(LogFormat::Pretty);
        let home = home()?;
        let config = load_config(&home)?;
        let records = load_records(&self.file)?;
        let ledger = Ledger::open_at(&home).context("failed to open sync ledger")?;
        let directory = directory(&config)?;

        let reconciler = Reconciler::new(&directory, &ledger, &config);
        let options = PipelineOptions {
            delay: Duration::from_secs(self.delay),
            limit: self.limit,
            force: self.force,
        };
        let report = pipeline::run(&reconciler, &ledger, &records, &options)
            .context("sync aborted")?;

        if self.json {
            print_json(&report)?;
        } else {
            print_table(&report, records.len());
        }

        if report.failed() > 0 {
            bail!("{} of {} records failed", report.failed(), report.results.len());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SyncReportJson {
    disabled: bool,
    synced: usize,
    unchanged: usize,
    failed: usize,
    records: Vec<RecordJson>,
}

#[derive(Serialize)]
struct RecordJson {
    record: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "record")]
    record: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "remote id")]
    remote_id: String,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_json(report: &PipelineReport) -> Result<()> {
    let payload = SyncReportJson {
        disabled: report.disabled,
        synced: report.synced(),
        unchanged: report.unchanged(),
        failed: report.failed(),
        records: report
            .results
            .iter()
            .map(|(record, result)| RecordJson {
                record: record.clone(),
                status: status_key(result),
                remote_id: match result {
                    RecordResult::Synced(outcome) => Some(outcome.remote_id.to_string()),
                    _ => None,
                },
                detail: detail(result),
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize sync report")?
    );
    Ok(())
}

fn print_table(report: &PipelineReport, total: usize) {
    if report.disabled {
        println!("sync is disabled in configuration; {total} records skipped");
        return;
    }

    let rows: Vec<RecordRow> = report
        .results
        .iter()
        .map(|(record, result)| RecordRow {
            record: record.clone(),
            status: status_label(result),
            remote_id: match result {
                RecordResult::Synced(outcome) => outcome.remote_id.to_string(),
                _ => String::new(),
            },
            detail: detail(result).unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    println!(
        "{} synced, {} unchanged, {} failed",
        report.synced(),
        report.unchanged(),
        report.failed()
    );
}

fn status_key(result: &RecordResult) -> &'static str {
    match result {
        RecordResult::Synced(_) => "synced",
        RecordResult::Unchanged => "unchanged",
        RecordResult::Failed(_) => "failed",
    }
}

fn status_label(result: &RecordResult) -> String {
    match result {
        RecordResult::Synced(_) => "SYNCED".green().bold().to_string(),
        RecordResult::Unchanged => "UNCHANGED".bright_black().to_string(),
        RecordResult::Failed(_) => "FAILED".red().bold().to_string(),
    }
}

fn detail(result: &RecordResult) -> Option<String> {
    match result {
        RecordResult::Synced(outcome) => {
            let mut detail = operation_label(outcome.operation).to_owned();
            if let Some(link) = &outcome.company {
                detail.push_str(&format!(", company {}", link.company_id));
                if link.repaired {
                    detail.push_str(" (repaired)");
                }
            }
            Some(detail)
        }
        RecordResult::Unchanged => None,
        RecordResult::Failed(reason) => Some(reason.clone()),
    }
}

fn operation_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Created => "created",
        Operation::Updated => "updated",
        Operation::MatchedExisting => "matched existing",
    }
}
