//! `crmsync debug <file>`: inspect mapping and conversion offline.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use crmsync_core::mapper::{map_properties, natural_key, resolve_path, select_map};
use crmsync_core::{convert_value, LocalValue, MapVariant, RecordSnapshot};
use crmsync_sync::{Ledger, RemoteIdStore};

use super::{home, load_records};

/// Arguments for `crmsync debug`.
#[derive(Args, Debug)]
pub struct DebugArgs {
    /// JSON file holding one record snapshot or an array of them.
    pub file: PathBuf,

    /// Only show records whose natural key equals this value.
    #[arg(long)]
    pub key: Option<String>,
}

impl DebugArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let records = load_records(&self.file)?;
        let ledger = Ledger::open_at(&home).context("failed to open sync ledger")?;

        let mut shown = 0usize;
        for record in &records {
            let key = natural_key(record).ok().flatten();
            if self.key.is_some() && key != self.key {
                continue;
            }
            debug_record(record, key, &ledger);
            shown += 1;
        }

        if shown == 0 {
            bail!("no records matched");
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct RawRow {
    #[tabled(rename = "property")]
    property: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "value")]
    value: String,
}

#[derive(Tabled)]
struct ConvertedRow {
    #[tabled(rename = "property")]
    property: String,
    #[tabled(rename = "sent")]
    sent: String,
}

fn debug_record(record: &RecordSnapshot, key: Option<String>, ledger: &Ledger) {
    println!();
    println!(
        "{}",
        format!("=== {} {} ===", record.kind, record.ledger_key()).bold()
    );

    let remote_id = record
        .remote_id
        .clone()
        .or_else(|| ledger.stored_remote_id(record));
    let variant = match remote_id {
        Some(_) => MapVariant::Update,
        None => MapVariant::Create,
    };
    match &remote_id {
        Some(id) => println!("map variant: update (remote id {id})"),
        None => println!("map variant: create (no remote id)"),
    }
    let key_property = record.kind.natural_key_property();
    match key {
        Some(key) => println!("natural key: {key_property} = {key}"),
        None => println!("natural key: {}", format!("{key_property} missing").yellow()),
    }

    let map = select_map(record, variant);
    if map.is_empty() {
        println!("{}", "property map is empty; nothing will be sent".yellow());
        return;
    }

    println!("raw values:");
    let raw_rows: Vec<RawRow> = map
        .iter()
        .map(|(remote, path)| RawRow {
            property: remote.to_owned(),
            path: path.to_owned(),
            value: resolve_path(&record.attributes, path).map_or_else(
                || "NULL (unresolved)".to_owned(),
                describe,
            ),
        })
        .collect();
    print_table(raw_rows);

    println!("converted:");
    let mut issues = Vec::new();
    let mut converted_rows = Vec::new();
    for (property, value) in map_properties(record, variant).iter() {
        if let LocalValue::Sequence(items) = value {
            if items.iter().any(|item| !item.is_scalar()) {
                issues.push(format!("{property}: non-scalar sequence items are dropped"));
            }
        }
        let sent = match convert_value(value, property) {
            Ok(Some(text)) => text,
            Ok(None) => "(omitted)".bright_black().to_string(),
            Err(err) => {
                issues.push(err.to_string());
                "ERROR".red().bold().to_string()
            }
        };
        converted_rows.push(ConvertedRow {
            property: property.clone(),
            sent,
        });
    }
    print_table(converted_rows);

    if issues.is_empty() {
        println!("{}", "no obvious issues found".green());
    } else {
        println!("{}", "potential issues:".yellow().bold());
        for issue in issues {
            println!("  - {issue}");
        }
    }
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn describe(value: &LocalValue) -> String {
    let kind = match value.type_name() {
        Some(type_name) => format!("{} {type_name}", value.kind_name()),
        None => value.kind_name().to_owned(),
    };
    match value {
        LocalValue::Null => "NULL".to_owned(),
        LocalValue::Opaque { .. } => kind,
        other => format!("{kind}: {}", other.to_plain_json()),
    }
}
