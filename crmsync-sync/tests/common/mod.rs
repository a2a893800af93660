//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crmsync_core::{
    parse_snapshots, RecordKind, RecordSnapshot, RemoteId, RemoteProperties, RemoteRecord,
    SyncConfig,
};
use crmsync_sync::matching::normalize_name;
use crmsync_sync::{
    Association, AssociationType, DirectoryError, Ledger, RemoteDirectory, RemoteIdStore,
    SearchFilter, SearchOperator, SyncError,
};

// ---------------------------------------------------------------------------
// Calls and scripted responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetById(RecordKind, String),
    GetByKey(RecordKind, String),
    Create(RecordKind, RemoteProperties),
    Update(RecordKind, String, RemoteProperties),
    Search(RecordKind, SearchOperator, String),
    Associate(String, String),
}

/// Scripted result for the next call of an operation.
#[derive(Debug, Clone)]
pub enum Scripted {
    Fail(DirectoryError),
    /// The target disappears just before the call (update only).
    Vanish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    GetById,
    GetByKey,
    Create,
    Update,
    Search,
    Associate,
}

#[derive(Default)]
struct State {
    records: BTreeMap<(RecordKind, String), RemoteProperties>,
    /// Record ids invisible to natural-key lookups and searches for the
    /// given number of further lookups.
    hidden: BTreeMap<String, usize>,
    scripted: BTreeMap<Op, VecDeque<Scripted>>,
    links: Vec<(String, String)>,
    calls: Vec<Call>,
    next_id: u64,
}

// ---------------------------------------------------------------------------
// FakeDirectory
// ---------------------------------------------------------------------------

/// A remote CRM held in memory that records every call.
#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<State>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: RecordKind, id: &str, props: &[(&str, &str)]) {
        let mut s = self.state.lock().unwrap();
        s.records
            .insert((kind, id.to_owned()), props.iter().copied().collect());
    }

    pub fn remove(&self, kind: RecordKind, id: &str) {
        self.state.lock().unwrap().records.remove(&(kind, id.to_owned()));
    }

    /// Hide `id` from the next `lookups` natural-key lookups or searches.
    pub fn hide_from_lookups(&self, id: &str, lookups: usize) {
        self.state.lock().unwrap().hidden.insert(id.to_owned(), lookups);
    }

    pub fn script(&self, op: Op, response: Scripted) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(op)
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn creates(&self) -> Vec<RemoteProperties> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create(_, props) => Some(props),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<(String, RemoteProperties)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(_, id, props) => Some((id, props)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        let s = self.state.lock().unwrap();
        s.records.keys().filter(|(k, _)| *k == kind).count()
    }

    pub fn links(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().links.clone()
    }

    pub fn property(&self, kind: RecordKind, id: &str, name: &str) -> Option<String> {
        let s = self.state.lock().unwrap();
        s.records
            .get(&(kind, id.to_owned()))
            .and_then(|p| p.get(name).map(str::to_owned))
    }

    fn next_scripted(s: &mut State, op: Op) -> Option<Scripted> {
        s.scripted.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Records of `kind` visible to lookups, consuming one unit of hiding.
    fn visible(s: &mut State, kind: RecordKind) -> Vec<RemoteRecord> {
        let mut out = Vec::new();
        let ids: Vec<String> = s
            .records
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect();
        for id in ids {
            if let Some(left) = s.hidden.get_mut(&id) {
                if *left > 0 {
                    *left -= 1;
                    continue;
                }
            }
            let props = s.records[&(kind, id.clone())].clone();
            out.push(RemoteRecord::new(id.as_str(), props));
        }
        out
    }
}

fn fail(scripted: Option<Scripted>) -> Result<bool, DirectoryError> {
    match scripted {
        Some(Scripted::Fail(e)) => Err(e),
        Some(Scripted::Vanish) => Ok(true),
        None => Ok(false),
    }
}

impl RemoteDirectory for FakeDirectory {
    fn get_by_id(
        &self,
        kind: RecordKind,
        id: &RemoteId,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::GetById(kind, id.0.clone()));
        fail(Self::next_scripted(&mut s, Op::GetById))?;
        Ok(s.records
            .get(&(kind, id.0.clone()))
            .map(|p| RemoteRecord::new(id.clone(), p.clone())))
    }

    fn get_by_natural_key(
        &self,
        kind: RecordKind,
        property: &str,
        value: &str,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::GetByKey(kind, value.to_owned()));
        fail(Self::next_scripted(&mut s, Op::GetByKey))?;
        Ok(Self::visible(&mut s, kind).into_iter().find(|r| {
            r.property(property)
                .map_or(false, |v| v.eq_ignore_ascii_case(value))
        }))
    }

    fn create(
        &self,
        kind: RecordKind,
        properties: &RemoteProperties,
    ) -> Result<RemoteRecord, DirectoryError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::Create(kind, properties.clone()));
        fail(Self::next_scripted(&mut s, Op::Create))?;

        let key = kind.natural_key_property();
        if let Some(value) = properties.get(key) {
            let taken = s.records.iter().find(|((k, _), p)| {
                *k == kind && p.get(key).map_or(false, |v| v.eq_ignore_ascii_case(value))
            });
            if let Some(((_, id), _)) = taken {
                return Err(DirectoryError::Conflict {
                    message: format!("Contact already exists. Existing ID: {id}"),
                    existing_id: Some(RemoteId::from(id.as_str())),
                });
            }
        }

        s.next_id += 1;
        let id = format!("{}", 100 + s.next_id);
        s.records.insert((kind, id.clone()), properties.clone());
        Ok(RemoteRecord::new(id, properties.clone()))
    }

    fn update(
        &self,
        kind: RecordKind,
        id: &RemoteId,
        properties: &RemoteProperties,
    ) -> Result<Option<RemoteRecord>, DirectoryError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::Update(kind, id.0.clone(), properties.clone()));
        if fail(Self::next_scripted(&mut s, Op::Update))? {
            s.records.remove(&(kind, id.0.clone()));
        }
        let Some(current) = s.records.get_mut(&(kind, id.0.clone())) else {
            return Ok(None);
        };
        for (k, v) in properties.iter() {
            current.insert(k, v);
        }
        Ok(Some(RemoteRecord::new(id.clone(), current.clone())))
    }

    fn search(
        &self,
        kind: RecordKind,
        filter: &SearchFilter,
    ) -> Result<Vec<RemoteRecord>, DirectoryError> {
        let mut s = self.state.lock().unwrap();
        s.calls
            .push(Call::Search(kind, filter.operator, filter.value.clone()));
        fail(Self::next_scripted(&mut s, Op::Search))?;
        let wanted = filter.value.to_lowercase();
        Ok(Self::visible(&mut s, kind)
            .into_iter()
            .filter(|r| {
                let Some(value) = r.property(&filter.property) else {
                    return false;
                };
                match filter.operator {
                    SearchOperator::Eq => value.to_lowercase() == wanted,
                    SearchOperator::ContainsToken => {
                        let tokens = normalize_name(value);
                        wanted
                            .split_whitespace()
                            .any(|w| tokens.split_whitespace().any(|t| t == w))
                    }
                }
            })
            .collect())
    }

    fn associate(
        &self,
        _from_kind: RecordKind,
        from_id: &RemoteId,
        to_kind: RecordKind,
        to_id: &RemoteId,
        _association: &AssociationType,
    ) -> Result<Association, DirectoryError> {
        let mut s = self.state.lock().unwrap();
        s.calls.push(Call::Associate(from_id.0.clone(), to_id.0.clone()));
        fail(Self::next_scripted(&mut s, Op::Associate))?;
        if !s.records.contains_key(&(to_kind, to_id.0.clone())) {
            return Ok(Association::TargetMissing);
        }
        let pair = (from_id.0.clone(), to_id.0.clone());
        if !s.links.contains(&pair) {
            s.links.push(pair);
        }
        Ok(Association::Linked)
    }
}

// ---------------------------------------------------------------------------
// RecordingStore
// ---------------------------------------------------------------------------

/// A ledger that also records every write-back.
#[derive(Default)]
pub struct RecordingStore {
    pub ledger: Ledger,
    writes: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(String, Option<String>)> {
        self.writes.lock().unwrap().clone()
    }
}

impl RemoteIdStore for RecordingStore {
    fn stored_remote_id(&self, record: &RecordSnapshot) -> Option<RemoteId> {
        self.ledger.stored_remote_id(record)
    }

    fn persist_remote_id(
        &self,
        record: &RecordSnapshot,
        remote_id: Option<&RemoteId>,
    ) -> Result<(), SyncError> {
        self.writes
            .lock()
            .unwrap()
            .push((record.ledger_key(), remote_id.map(|id| id.0.clone())));
        self.ledger.persist_remote_id(record, remote_id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Route library log output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config with no waits, so tests never sleep.
pub fn instant_config() -> SyncConfig {
    SyncConfig {
        race_recheck_delay_ms: 0,
        conflict_recheck_delay_ms: 0,
        ..SyncConfig::default()
    }
}

pub fn snapshot(json: &str) -> RecordSnapshot {
    parse_snapshots(json).expect("snapshot").remove(0)
}

pub fn pairs(props: &RemoteProperties) -> Vec<(String, String)> {
    props
        .iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

pub fn contact(email: &str, first_name: &str) -> RecordSnapshot {
    snapshot(&format!(
        r#"{{
            "local_id": "7",
            "entity_type": "user",
            "attributes": {{"email": "{email}", "first_name": "{first_name}", "tags": []}},
            "property_map": {{"email": "email", "firstname": "first_name", "tags": "tags"}},
            "update_property_map": {{"firstname": "first_name"}}
        }}"#
    ))
}
