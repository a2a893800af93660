//! Subcommand implementations and the helpers they share.

pub mod config;
pub mod debug;
pub mod properties;
pub mod sync;
pub mod worker;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crmsync_core::{config as sync_config, load_snapshots, RecordSnapshot, SyncConfig};

use crate::hubspot::HttpDirectory;

/// Environment variable that overrides the configured API token.
pub const TOKEN_ENV: &str = "CRMSYNC_TOKEN";

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_config(home: &Path) -> Result<SyncConfig> {
    sync_config::load_at(home).with_context(|| {
        format!(
            "failed to load {}",
            sync_config::config_path_at(home).display()
        )
    })
}

pub(crate) fn load_records(path: &Path) -> Result<Vec<RecordSnapshot>> {
    let records = load_snapshots(path)
        .with_context(|| format!("failed to read snapshots from '{}'", path.display()))?;
    if records.is_empty() {
        bail!("'{}' contains no records", path.display());
    }
    Ok(records)
}

/// API token from `CRMSYNC_TOKEN`, else from the config file.
pub(crate) fn token(config: &SyncConfig) -> Result<String> {
    let from_env = std::env::var(TOKEN_ENV).ok().filter(|t| !t.trim().is_empty());
    match from_env.or_else(|| config.token.clone()) {
        Some(token) => Ok(token),
        None => bail!("no API token: set {TOKEN_ENV} or `token` in ~/.crmsync/config.yaml"),
    }
}

/// HTTP directory for `config`. A disabled config gets no token, since
/// nothing will be sent.
pub(crate) fn directory(config: &SyncConfig) -> Result<HttpDirectory> {
    let token = if config.disabled {
        String::new()
    } else {
        token(config)?
    };
    Ok(HttpDirectory::new(config, token))
}
