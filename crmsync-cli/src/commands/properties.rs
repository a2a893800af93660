//! `crmsync sync-properties <file>`: create missing remote properties.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crmsync_core::RecordKind;
use crmsync_sync::schema::{mapped_property_names, sync_properties};
use crmsync_sync::GroupStatus;
use crmsync_worker::{init_tracing, LogFormat};

use super::{directory, home, load_config, load_records};
use crate::RecordKindArg;

/// Arguments for `crmsync sync-properties`.
#[derive(Args, Debug)]
pub struct SyncPropertiesArgs {
    /// Snapshot file whose property maps name the wanted properties.
    pub file: PathBuf,

    /// Record kind whose properties to sync: contact | company.
    #[arg(long, default_value = "contact")]
    pub kind: RecordKindArg,
}

impl SyncPropertiesArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(LogFormat::Pretty);
        let kind: RecordKind = self.kind.into();
        let home = home()?;
        let config = load_config(&home)?;
        let records = load_records(&self.file)?;

        let wanted = mapped_property_names(&records, kind);
        if wanted.is_empty() {
            println!("No {kind} properties are mapped in '{}'", self.file.display());
            return Ok(());
        }

        let directory = directory(&config)?;
        let report = sync_properties(&directory, kind, wanted, &config)
            .with_context(|| format!("failed to sync {kind} properties"))?;

        match report.group {
            GroupStatus::Created => println!("✓ created property group '{}'", config.property_group),
            GroupStatus::AlreadyExists => {
                println!("· property group '{}' already exists", config.property_group)
            }
        }
        if report.created.is_empty() {
            println!("· all {} mapped {kind} properties already exist", report.wanted.len());
        } else {
            println!("✓ created {} {kind} properties:", report.created.len());
            for name in &report.created {
                println!("  ✎  {name}");
            }
        }
        Ok(())
    }
}
