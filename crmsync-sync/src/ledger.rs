//! Sync ledger: remote id write-back and change fingerprints.
//!
//! Persists a [`LedgerFile`] JSON document at `<home>/.crmsync/ledger.json`,
//! keyed by `<entity_type>:<local_id>`. Writes use an atomic `.tmp` + rename.
//!
//! The reconciler only needs the [`RemoteIdStore`] contract; the pipeline
//! additionally uses fingerprints to skip records whose mapped properties did
//! not change since the last push.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crmsync_core::{RecordSnapshot, RemoteId, RemoteProperties};

use crate::error::{io_err, SyncError};

/// Write-back target for remote ids.
pub trait RemoteIdStore: Send + Sync {
    /// Remote id remembered for `record`, if any.
    fn stored_remote_id(&self, record: &RecordSnapshot) -> Option<RemoteId>;

    /// Remember (or, with `None`, forget) the remote id of `record`.
    fn persist_remote_id(
        &self,
        record: &RecordSnapshot,
        remote_id: Option<&RemoteId>,
    ) -> Result<(), SyncError>;
}

/// Per-record ledger state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    /// SHA-256 of the last property set pushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub synced_at: DateTime<Utc>,
}

/// On-disk ledger payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerFile {
    pub entries: BTreeMap<String, LedgerEntry>,
}

/// Path to the ledger JSON, rooted at `home`.
///
/// `~/.crmsync/ledger.json`
pub fn ledger_path_at(home: &Path) -> PathBuf {
    home.join(".crmsync").join("ledger.json")
}

/// Stable digest of a property set. Key order matters.
pub fn fingerprint(properties: &RemoteProperties) -> String {
    let mut h = Sha256::new();
    for (key, value) in properties.iter() {
        h.update(key.as_bytes());
        h.update([0]);
        h.update(value.as_bytes());
        h.update([0]);
    }
    hex::encode(h.finalize())
}

/// Thread-safe ledger, optionally backed by a file.
#[derive(Debug, Default)]
pub struct Ledger {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, LedgerEntry>>,
}

impl Ledger {
    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `<home>/.crmsync/ledger.json`; an absent file is an empty ledger.
    /// Every change is saved back to the same file.
    pub fn open_at(home: &Path) -> Result<Self, SyncError> {
        let path = ledger_path_at(home);
        let file = load_file(&path)?;
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(file.entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entry(&self, key: &str) -> Option<LedgerEntry> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `properties` match what was last pushed for `record`.
    pub fn is_unchanged(&self, record: &RecordSnapshot, properties: &RemoteProperties) -> bool {
        let digest = fingerprint(properties);
        self.entry(&record.ledger_key())
            .and_then(|e| e.fingerprint)
            .map_or(false, |stored| stored == digest)
    }

    /// Remember the property set just pushed for `record`.
    pub fn record_push(
        &self,
        record: &RecordSnapshot,
        properties: &RemoteProperties,
    ) -> Result<(), SyncError> {
        let digest = fingerprint(properties);
        self.modify(&record.ledger_key(), |entry| entry.fingerprint = Some(digest))
    }

    fn modify(&self, key: &str, change: impl FnOnce(&mut LedgerEntry)) -> Result<(), SyncError> {
        let mut entries = self.lock();
        let entry = entries.entry(key.to_owned()).or_insert_with(|| LedgerEntry {
            remote_id: None,
            fingerprint: None,
            synced_at: Utc::now(),
        });
        change(entry);
        entry.synced_at = Utc::now();
        match &self.path {
            Some(path) => save_file(path, &entries),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, LedgerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RemoteIdStore for Ledger {
    fn stored_remote_id(&self, record: &RecordSnapshot) -> Option<RemoteId> {
        self.entry(&record.ledger_key()).and_then(|e| e.remote_id)
    }

    fn persist_remote_id(
        &self,
        record: &RecordSnapshot,
        remote_id: Option<&RemoteId>,
    ) -> Result<(), SyncError> {
        let remote_id = remote_id.cloned();
        self.modify(&record.ledger_key(), |entry| {
            if entry.remote_id != remote_id {
                // A different remote record invalidates the fingerprint.
                entry.fingerprint = None;
            }
            entry.remote_id = remote_id;
        })
    }
}

fn load_file(path: &Path) -> Result<LedgerFile, SyncError> {
    if !path.exists() {
        return Ok(LedgerFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Writes to `<path>.tmp` then renames to `<path>`.
fn save_file(path: &Path, entries: &BTreeMap<String, LedgerEntry>) -> Result<(), SyncError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid ledger path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    #[derive(Serialize)]
    struct LedgerFileRef<'a> {
        entries: &'a BTreeMap<String, LedgerEntry>,
    }
    let json = serde_json::to_string_pretty(&LedgerFileRef { entries })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsync_core::{PropertyMap, RecordKind};
    use tempfile::TempDir;

    fn record(id: &str) -> RecordSnapshot {
        let mut r = RecordSnapshot::new(id, RecordKind::Contact, PropertyMap::new());
        r.entity_type = Some("user".into());
        r
    }

    fn props(pairs: &[(&str, &str)]) -> RemoteProperties {
        pairs.iter().copied().collect()
    }

    #[test]
    fn empty_ledger_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open_at(tmp.path()).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn remote_id_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open_at(tmp.path()).unwrap();
        ledger
            .persist_remote_id(&record("7"), Some(&RemoteId::from("42")))
            .unwrap();

        let reopened = Ledger::open_at(tmp.path()).unwrap();
        assert_eq!(
            reopened.stored_remote_id(&record("7")),
            Some(RemoteId::from("42"))
        );
        assert_eq!(reopened.entry("user:7").unwrap().remote_id.unwrap().0, "42");
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let ledger = Ledger::open_at(tmp.path()).unwrap();
        ledger.record_push(&record("1"), &props(&[("email", "a@x.com")])).unwrap();
        let tmp_path = ledger_path_at(tmp.path()).with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after atomic rename");
    }

    #[test]
    fn fingerprint_depends_on_content_and_order() {
        let a = props(&[("email", "a@x.com"), ("firstname", "Ann")]);
        let b = props(&[("firstname", "Ann"), ("email", "a@x.com")]);
        let c = props(&[("email", "a@x.com"), ("firstname", "Anne")]);
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn unchanged_detection_and_invalidation_on_new_remote_id() {
        let ledger = Ledger::in_memory();
        let r = record("1");
        let p = props(&[("email", "a@x.com")]);
        assert!(!ledger.is_unchanged(&r, &p));

        ledger.persist_remote_id(&r, Some(&RemoteId::from("42"))).unwrap();
        ledger.record_push(&r, &p).unwrap();
        assert!(ledger.is_unchanged(&r, &p));

        ledger.persist_remote_id(&r, Some(&RemoteId::from("42"))).unwrap();
        assert!(ledger.is_unchanged(&r, &p), "same id keeps the fingerprint");

        ledger.persist_remote_id(&r, Some(&RemoteId::from("99"))).unwrap();
        assert!(!ledger.is_unchanged(&r, &p));
    }

    #[test]
    fn forgetting_a_remote_id() {
        let ledger = Ledger::in_memory();
        let r = record("1");
        ledger.persist_remote_id(&r, Some(&RemoteId::from("42"))).unwrap();
        ledger.persist_remote_id(&r, None).unwrap();
        assert_eq!(ledger.stored_remote_id(&r), None);
    }
}
