//! `crmsync worker <file>`: run records through the retrying job queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;

use crmsync_sync::{Ledger, RemoteIdStore, SyncJob};
use crmsync_worker::{dead_letter_path_at, start_blocking, LogFormat, WorkerContext};

use super::{directory, home, load_config, load_records};

/// Arguments for `crmsync worker`.
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// JSON file holding one record snapshot or an array of them.
    pub file: PathBuf,

    /// Log as JSON lines instead of human-readable text.
    #[arg(long)]
    pub json_logs: bool,
}

impl WorkerArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;
        let records = load_records(&self.file)?;
        let ledger: Arc<dyn RemoteIdStore> =
            Arc::new(Ledger::open_at(&home).context("failed to open sync ledger")?);
        let directory = Arc::new(directory(&config)?);

        let dead_letter = dead_letter_path_at(&home);
        let ctx = WorkerContext::new(directory, ledger, config).with_dead_letter(&dead_letter);
        let jobs = records.into_iter().map(SyncJob::new).collect();
        let format = if self.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        };

        let report = start_blocking(ctx, jobs, format).context("worker exited with error")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize worker report")?
        );

        if !report.failed.is_empty() {
            bail!(
                "{} jobs failed; see {}",
                report.failed.len(),
                dead_letter.display()
            );
        }
        Ok(())
    }
}
