//! Sync configuration stored as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.crmsync/
//!   config.yaml   (mode 0600, written on `config init`)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! A missing config file is not an error: [`load_at`] returns the defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.hubapi.com";
pub const DEFAULT_PROPERTY_GROUP: &str = "app_user_profile";
pub const DEFAULT_PROPERTY_GROUP_LABEL: &str = "App User Profile";

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Top-level sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When true, sync jobs complete without touching the remote.
    pub disabled: bool,
    pub api_base_url: String,
    /// Private-app bearer token. `CRMSYNC_TOKEN` overrides it at runtime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Log every outgoing request at debug level.
    pub log_requests: bool,
    pub request_timeout_secs: u64,
    /// Remote property group that holds created properties.
    pub property_group: String,
    pub property_group_label: String,
    pub queue: QueueConfig,
    /// Pause before creating, followed by one natural-key re-check.
    pub race_recheck_delay_ms: u64,
    /// Pause after a create conflict before re-resolving.
    pub conflict_recheck_delay_ms: u64,
    /// Minimum similarity percentage for a fuzzy company-name match.
    pub name_match_threshold: f64,
    /// Contact entity type → company entity type, used when a company
    /// relation does not name its own entity type.
    pub company_entity_types: BTreeMap<String, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            api_base_url: DEFAULT_API_BASE_URL.to_owned(),
            token: None,
            log_requests: false,
            request_timeout_secs: 30,
            property_group: DEFAULT_PROPERTY_GROUP.to_owned(),
            property_group_label: DEFAULT_PROPERTY_GROUP_LABEL.to_owned(),
            queue: QueueConfig::default(),
            race_recheck_delay_ms: 100,
            conflict_recheck_delay_ms: 200,
            name_match_threshold: 80.0,
            company_entity_types: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    pub fn race_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.race_recheck_delay_ms)
    }

    pub fn conflict_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.conflict_recheck_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "api_base_url",
                reason: "must not be empty".to_owned(),
            });
        }
        if !(0.0..=100.0).contains(&self.name_match_threshold) {
            return Err(ConfigError::Invalid {
                field: "name_match_threshold",
                reason: format!("{} is not a percentage", self.name_match_threshold),
            });
        }
        if self.queue.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.retry_attempts",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Queue and retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts before a transient failure becomes permanent.
    pub retry_attempts: u32,
    /// Base delay for timeouts and transport errors.
    pub retry_delay_secs: u64,
    /// Base delay for rate limits without a `Retry-After`.
    pub rate_limit_delay_secs: u64,
    /// Base delay for unresolved create conflicts.
    pub conflict_delay_secs: u64,
    /// Upper bound for any backoff delay.
    pub max_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_secs: 60,
            rate_limit_delay_secs: 30,
            conflict_delay_secs: 5,
            max_delay_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Paths
// ---------------------------------------------------------------------------

/// `<home>/.crmsync/`: pure, no I/O.
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".crmsync")
}

/// `<home>/.crmsync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join("config.yaml")
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_path_at(&home()?))
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.crmsync/config.yaml`, or the defaults when it is absent.
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed YAML,
/// `ConfigError::Invalid` if a value is out of range.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: SyncConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the config to `<home>/.crmsync/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    let dir = config_dir_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

/// Write the default config unless one exists. Idempotent: an existing file
/// is loaded and returned unchanged.
pub fn init_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    if config_path_at(home).exists() {
        return load_at(home);
    }
    let config = SyncConfig::default();
    save_at(home, &config)?;
    Ok(config)
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<SyncConfig, ConfigError> {
    init_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
