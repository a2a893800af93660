//! crmsync: push local record snapshots into a CRM.
//!
//! # Usage
//!
//! ```text
//! crmsync sync <file> [--delay SECS] [--limit N] [--force] [--json]
//! crmsync sync-properties <file> [--kind contact|company]
//! crmsync debug <file> [--key VALUE]
//! crmsync worker <file> [--json-logs]
//! crmsync config init|show
//! ```

mod commands;
mod hubspot;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, debug::DebugArgs, properties::SyncPropertiesArgs, sync::SyncArgs,
    worker::WorkerArgs,
};
use crmsync_core::RecordKind;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "crmsync",
    version,
    about = "Sync local record snapshots into a CRM",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync every record in a snapshot file, one after another.
    Sync(SyncArgs),

    /// Create the property group and any mapped properties missing remotely.
    SyncProperties(SyncPropertiesArgs),

    /// Show what would be sent for each record, without contacting the remote.
    Debug(DebugArgs),

    /// Run the records through the retrying job queue.
    Worker(WorkerArgs),

    /// Manage ~/.crmsync/config.yaml.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared RecordKind argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `RecordKind` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordKindArg(pub RecordKind);

impl FromStr for RecordKindArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Ok(Self(RecordKind::Contact)),
            "company" | "companies" => Ok(Self(RecordKind::Company)),
            other => Err(format!(
                "unknown record kind '{other}'; expected: contact, company"
            )),
        }
    }
}

impl fmt::Display for RecordKindArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<RecordKindArg> for RecordKind {
    fn from(k: RecordKindArg) -> Self {
        k.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::SyncProperties(args) => args.run(),
        Commands::Debug(args) => args.run(),
        Commands::Worker(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
    }
}
