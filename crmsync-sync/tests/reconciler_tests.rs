//! Reconciler behaviour against an in-memory remote.

mod common;

use std::time::Duration;

use common::*;
use crmsync_core::{MapVariant, RecordKind, RecordSnapshot, SyncConfig};
use crmsync_sync::{
    classify, DirectoryError, Failure, Operation, Reconciler, RetryDecision, RetryPolicy,
    SyncError, SyncOutcome,
};

fn reconcile(
    dir: &FakeDirectory,
    store: &RecordingStore,
    record: &RecordSnapshot,
) -> Result<SyncOutcome, SyncError> {
    reconcile_with(dir, store, record, &instant_config())
}

fn reconcile_with(
    dir: &FakeDirectory,
    store: &RecordingStore,
    record: &RecordSnapshot,
    config: &SyncConfig,
) -> Result<SyncOutcome, SyncError> {
    init_logging();
    Reconciler::new(dir, store, config).reconcile(record)
}

fn kv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn contact_with_id(remote_id: &str) -> RecordSnapshot {
    let mut record = contact("a@x.com", "Ann");
    record.remote_id = Some(remote_id.into());
    record
}

// ---------------------------------------------------------------------------
// 1. Create / update
// ---------------------------------------------------------------------------

#[test]
fn new_contact_is_created_with_converted_properties() {
    let dir = FakeDirectory::new();
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact("a@x.com", "Ann")).expect("reconcile");

    assert_eq!(outcome.operation, Operation::Created);
    assert_eq!(outcome.map_variant, MapVariant::Create);
    let creates = dir.creates();
    assert_eq!(creates.len(), 1);
    assert_eq!(pairs(&creates[0]), kv(&[("email", "a@x.com"), ("firstname", "Ann")]));
    assert_eq!(
        store.writes(),
        vec![("user:7".to_string(), Some(outcome.remote_id.0.clone()))]
    );
}

#[test]
fn stored_id_is_updated_with_update_map_and_never_created() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Contact, "42", &[("email", "a@x.com")]);
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact_with_id("42")).expect("reconcile");

    assert_eq!(outcome.operation, Operation::Updated);
    assert_eq!(outcome.map_variant, MapVariant::Update);
    assert_eq!(outcome.remote_id.0, "42");
    assert!(dir.creates().is_empty());
    let updates = dir.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "42");
    assert_eq!(pairs(&updates[0].1), kv(&[("firstname", "Ann")]));
    assert!(store.writes().is_empty(), "unchanged id must not be written back");
}

#[test]
fn reconciling_twice_keeps_one_remote_record() {
    let dir = FakeDirectory::new();
    let store = RecordingStore::new();
    let record = contact("a@x.com", "Ann");

    let first = reconcile(&dir, &store, &record).expect("first");
    let second = reconcile(&dir, &store, &record).expect("second");

    assert_eq!(first.operation, Operation::Created);
    assert_eq!(second.operation, Operation::Updated);
    assert_eq!(first.remote_id, second.remote_id);
    assert_eq!(dir.count(RecordKind::Contact), 1);
    assert_eq!(dir.creates().len(), 1);
    assert_eq!(store.writes().len(), 1);
}

#[test]
fn existing_contact_found_by_email_is_adopted() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Contact, "88", &[("email", "A@X.com")]);
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact("a@x.com", "Ann")).expect("reconcile");

    assert_eq!(outcome.operation, Operation::Updated);
    assert_eq!(outcome.remote_id.0, "88");
    assert_eq!(store.writes(), vec![("user:7".to_string(), Some("88".to_string()))]);
}

// ---------------------------------------------------------------------------
// 2. Stale references
// ---------------------------------------------------------------------------

#[test]
fn stale_stored_id_is_repaired_with_one_write_back() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Contact, "2", &[("email", "a@x.com")]);
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact_with_id("1")).expect("reconcile");

    assert_eq!(outcome.remote_id.0, "2");
    assert_eq!(outcome.operation, Operation::Updated);
    assert_eq!(store.writes(), vec![("user:7".to_string(), Some("2".to_string()))]);
    assert!(dir.creates().is_empty());
}

#[test]
fn record_vanishing_during_update_is_re_resolved() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Contact, "42", &[("email", "a@x.com")]);
    dir.insert(RecordKind::Contact, "77", &[("email", "a@x.com")]);
    dir.script(Op::Update, Scripted::Vanish);
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact_with_id("42")).expect("reconcile");

    assert_eq!(outcome.remote_id.0, "77");
    assert_eq!(outcome.operation, Operation::Updated);
    let updated: Vec<String> = dir.updates().into_iter().map(|(id, _)| id).collect();
    assert_eq!(updated, ["42", "77"]);
    assert!(dir.creates().is_empty());
}

#[test]
fn record_vanishing_without_replacement_is_recreated() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Contact, "42", &[("email", "a@x.com")]);
    dir.script(Op::Update, Scripted::Vanish);
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact_with_id("42")).expect("reconcile");

    assert_eq!(outcome.operation, Operation::Created);
    assert_ne!(outcome.remote_id.0, "42");
    assert_eq!(dir.creates().len(), 1);
    assert_eq!(
        store.writes(),
        vec![("user:7".to_string(), Some(outcome.remote_id.0.clone()))]
    );
}

// ---------------------------------------------------------------------------
// 3. Races and conflicts
// ---------------------------------------------------------------------------

#[test]
fn record_appearing_before_create_is_updated_instead() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Contact, "55", &[("email", "a@x.com")]);
    dir.hide_from_lookups("55", 1);
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact("a@x.com", "Ann")).expect("reconcile");

    assert_eq!(outcome.operation, Operation::Updated);
    assert_eq!(outcome.remote_id.0, "55");
    assert!(dir.creates().is_empty());
}

#[test]
fn create_conflict_adopts_the_existing_record() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Contact, "55", &[("email", "a@x.com")]);
    // Invisible to the initial lookup and the race re-check.
    dir.hide_from_lookups("55", 2);
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &contact("a@x.com", "Ann")).expect("reconcile");

    assert_eq!(outcome.operation, Operation::MatchedExisting);
    assert_eq!(outcome.remote_id.0, "55");
    assert_eq!(dir.count(RecordKind::Contact), 1);
    assert_eq!(store.writes(), vec![("user:7".to_string(), Some("55".to_string()))]);
}

#[test]
fn unresolved_conflict_is_transient() {
    let dir = FakeDirectory::new();
    dir.script(
        Op::Create,
        Scripted::Fail(DirectoryError::Conflict {
            message: "Contact already exists".into(),
            existing_id: None,
        }),
    );
    let store = RecordingStore::new();

    let err = reconcile(&dir, &store, &contact("a@x.com", "Ann")).unwrap_err();

    assert!(matches!(err, SyncError::UnresolvedConflict { .. }), "got: {err}");
    assert!(err.is_transient());
    assert!(matches!(err.failure(), Failure::Transient { .. }));
    assert!(store.writes().is_empty());
}

// ---------------------------------------------------------------------------
// 4. Failures
// ---------------------------------------------------------------------------

#[test]
fn validation_failure_carries_properties_and_map_variant() {
    let dir = FakeDirectory::new();
    dir.script(
        Op::Create,
        Scripted::Fail(DirectoryError::Validation {
            message: "Property \"firstname\" is invalid".into(),
        }),
    );
    let store = RecordingStore::new();

    match reconcile(&dir, &store, &contact("a@x.com", "Ann")) {
        Err(SyncError::Validation {
            properties,
            variant,
            ..
        }) => {
            assert_eq!(variant, MapVariant::Create);
            assert_eq!(pairs(&properties), kv(&[("email", "a@x.com"), ("firstname", "Ann")]));
        }
        other => panic!("expected Validation, got {other:?}"),
    }
}

#[test]
fn rate_limit_is_propagated_and_retried_after_header_delay() {
    let dir = FakeDirectory::new();
    dir.script(
        Op::GetByKey,
        Scripted::Fail(DirectoryError::RateLimited {
            retry_after: Some(Duration::from_secs(10)),
        }),
    );
    let store = RecordingStore::new();

    let err = reconcile(&dir, &store, &contact("a@x.com", "Ann")).unwrap_err();

    assert!(
        matches!(err, SyncError::Directory(DirectoryError::RateLimited { .. })),
        "got: {err}"
    );
    assert!(dir.creates().is_empty());
    assert_eq!(
        classify(&err, 1, &RetryPolicy::default()),
        RetryDecision::Retry {
            after: Duration::from_secs(10)
        }
    );
}

#[test]
fn unconvertible_attribute_fails_before_any_write() {
    let dir = FakeDirectory::new();
    let store = RecordingStore::new();
    let record = snapshot(
        r#"{"local_id": "7", "attributes": {"email": "a@x.com", "avatar": {"$opaque": "Stream"}},
            "property_map": {"email": "email", "avatar": "avatar"}}"#,
    );

    let err = reconcile(&dir, &store, &record).unwrap_err();

    assert!(matches!(err, SyncError::Conversion(_)), "got: {err}");
    assert!(matches!(err.failure(), Failure::Validation(_)));
    assert!(dir.creates().is_empty());
}

// ---------------------------------------------------------------------------
// 5. Companies
// ---------------------------------------------------------------------------

const CONTACT_WITH_COMPANY: &str = r#"{
    "local_id": "7",
    "entity_type": "user",
    "attributes": {"email": "a@x.com"},
    "property_map": {"email": "email"},
    "company": {
        "local_id": "3",
        "attributes": {"name": {"en": "Acme", "fr": "Acmé"}},
        "property_map": {"name": "name"}
    }
}"#;

#[test]
fn translatable_company_name_is_sent_in_english() {
    let dir = FakeDirectory::new();
    let store = RecordingStore::new();
    let company = snapshot(
        r#"{"local_id": "3", "kind": "company",
            "attributes": {"name": {"en": "Acme", "fr": "Acmé"}, "industry": []},
            "property_map": {"name": "name", "industry": "industry"}}"#,
    );

    let outcome = reconcile(&dir, &store, &company).expect("reconcile");

    assert_eq!(outcome.operation, Operation::Created);
    assert_eq!(pairs(&dir.creates()[0]), kv(&[("name", "Acme")]));
}

#[test]
fn company_is_matched_by_similar_name() {
    let dir = FakeDirectory::new();
    dir.insert(RecordKind::Company, "9", &[("name", "Acme Inc.")]);
    let store = RecordingStore::new();
    let company = snapshot(
        r#"{"local_id": "3", "kind": "company", "attributes": {"name": "ACME, Inc"},
            "property_map": {"name": "name"}}"#,
    );

    let outcome = reconcile(&dir, &store, &company).expect("reconcile");

    assert_eq!(outcome.remote_id.0, "9");
    assert_eq!(outcome.operation, Operation::Updated);
    assert!(dir.creates().is_empty());
}

#[test]
fn company_is_synced_before_contact_and_linked() {
    let dir = FakeDirectory::new();
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &snapshot(CONTACT_WITH_COMPANY)).expect("reconcile");

    let creates = dir.creates();
    assert_eq!(creates.len(), 2);
    assert_eq!(creates[0].get("name"), Some("Acme"), "company first");
    assert_eq!(creates[1].get("email"), Some("a@x.com"));

    let link = outcome.company.expect("company link");
    assert!(!link.repaired);
    assert_eq!(
        dir.links(),
        vec![(outcome.remote_id.0.clone(), link.company_id.0.clone())]
    );
}

#[test]
fn missing_association_target_is_healed_once() {
    let dir = FakeDirectory::new();
    let store = RecordingStore::new();
    let mut record = snapshot(CONTACT_WITH_COMPANY);
    if let Some(company) = record.company.as_deref_mut() {
        company.remote_id = Some("500".into());
    }
    let mut config = instant_config();
    config
        .company_entity_types
        .insert("user".into(), "organization".into());

    let outcome = reconcile_with(&dir, &store, &record, &config).expect("reconcile");

    let link = outcome.company.expect("company link");
    assert!(link.repaired);
    assert_ne!(link.company_id.0, "500");
    assert_eq!(
        dir.links(),
        vec![(outcome.remote_id.0.clone(), link.company_id.0.clone())]
    );

    let company_writes: Vec<(String, Option<String>)> = store
        .writes()
        .into_iter()
        .filter(|(key, _)| key.starts_with("organization:"))
        .collect();
    assert_eq!(
        company_writes,
        vec![
            ("organization:3".to_string(), None),
            ("organization:3".to_string(), Some(link.company_id.0.clone())),
        ]
    );
}

#[test]
fn rejected_company_does_not_block_its_contact() {
    let dir = FakeDirectory::new();
    dir.script(
        Op::Create,
        Scripted::Fail(DirectoryError::Validation {
            message: "Property values were not valid".into(),
        }),
    );
    let store = RecordingStore::new();

    let outcome = reconcile(&dir, &store, &snapshot(CONTACT_WITH_COMPANY)).expect("reconcile");

    assert_eq!(outcome.operation, Operation::Created);
    assert!(outcome.company.is_none());
    assert!(dir.links().is_empty());
    assert_eq!(dir.count(RecordKind::Company), 0);
    assert_eq!(dir.count(RecordKind::Contact), 1);
    let creates = dir.creates();
    assert_eq!(creates.len(), 2);
    assert_eq!(creates[1].get("email"), Some("a@x.com"));
}

#[test]
fn rate_limited_company_still_fails_the_contact() {
    let dir = FakeDirectory::new();
    dir.script(
        Op::Create,
        Scripted::Fail(DirectoryError::RateLimited { retry_after: None }),
    );
    let store = RecordingStore::new();

    let err = reconcile(&dir, &store, &snapshot(CONTACT_WITH_COMPANY)).unwrap_err();

    assert!(
        matches!(err, SyncError::Directory(DirectoryError::RateLimited { .. })),
        "got: {err}"
    );
    assert_eq!(dir.creates().len(), 1, "contact never attempted");
    assert_eq!(dir.count(RecordKind::Contact), 0);
}
