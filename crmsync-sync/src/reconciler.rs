//! Create-or-update reconciliation of one local record against the remote.
//!
//! ## Flow
//!
//! 1. Resolve an existing remote record: stored id, then natural key
//!    (contacts by property lookup, companies by name matching).
//!    An adopted id is written back when it differs from the stored one.
//! 2. Found → update with the update map. A stale id (update → not found)
//!    is repaired once by re-resolving; otherwise fall through to create.
//! 3. Not found → wait, re-check the natural key once, then create with
//!    the full map. A create conflict waits and re-resolves; a match is
//!    adopted, no match is an [`SyncError::UnresolvedConflict`].
//! 4. Contacts with a company relation: the company is reconciled first
//!    when it has no remote id, then linked. A missing link target clears
//!    the company id, reconciles it again and retries the link once.

use std::time::Duration;

use crmsync_core::{
    mapper, MapVariant, RecordKind, RecordSnapshot, RemoteId, RemoteProperties, RemoteRecord,
    SyncConfig,
};

use crate::directory::{Association, AssociationType, RemoteDirectory};
use crate::error::{DirectoryError, SyncError};
use crate::ledger::RemoteIdStore;
use crate::matching;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What the reconciler did to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Created,
    Updated,
    /// A create conflicted and the existing record was adopted unchanged.
    MatchedExisting,
}

/// Company association made for a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyLink {
    pub company_id: RemoteId,
    /// True when the stored company id was stale and had to be repaired.
    pub repaired: bool,
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub remote_id: RemoteId,
    /// Properties returned by the remote, else the properties sent.
    pub properties: RemoteProperties,
    pub operation: Operation,
    pub map_variant: MapVariant,
    pub company: Option<CompanyLink>,
}

impl SyncOutcome {
    fn new(
        remote: RemoteRecord,
        sent: RemoteProperties,
        operation: Operation,
        variant: MapVariant,
    ) -> Self {
        let properties = if remote.properties.is_empty() {
            sent
        } else {
            remote.properties
        };
        Self {
            remote_id: remote.id,
            properties,
            operation,
            map_variant: variant,
            company: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Reconciles records through a [`RemoteDirectory`], writing adopted and
/// created ids back to a [`RemoteIdStore`].
pub struct Reconciler<'a, D: RemoteDirectory + ?Sized> {
    directory: &'a D,
    store: &'a dyn RemoteIdStore,
    config: &'a SyncConfig,
}

impl<'a, D: RemoteDirectory + ?Sized> Reconciler<'a, D> {
    pub fn new(directory: &'a D, store: &'a dyn RemoteIdStore, config: &'a SyncConfig) -> Self {
        Self {
            directory,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        self.config
    }

    /// Reconcile `record` and, for a contact, its company relation.
    pub fn reconcile(&self, record: &RecordSnapshot) -> Result<SyncOutcome, SyncError> {
        let mut record = record.clone();
        record.apply_company_entity_types(&self.config.company_entity_types);

        let company = match (record.kind, record.company.as_deref()) {
            (RecordKind::Contact, Some(company)) => match self.ensure_company(company) {
                Ok(id) => Some((company, id)),
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    tracing::error!(
                        "company {} of {} failed, syncing contact without association: {err}",
                        company.ledger_key(),
                        record.ledger_key()
                    );
                    None
                }
            },
            _ => None,
        };

        let mut outcome = self.reconcile_one(&record)?;

        if let Some((company, company_id)) = company {
            outcome.company = Some(self.link_company(&outcome.remote_id, company, company_id)?);
        }
        Ok(outcome)
    }

    /// Reconcile a single record, ignoring relations.
    pub fn reconcile_one(&self, record: &RecordSnapshot) -> Result<SyncOutcome, SyncError> {
        let stored = self.stored_id(record);
        let key = mapper::natural_key(record)?;

        match self.resolve_existing(record, stored.as_ref(), key.as_deref())? {
            Some(found) => {
                self.write_back(record, stored.as_ref(), &found.id)?;
                self.update_existing(record, found.id, key.as_deref(), true)
            }
            None => self.create_new(record, stored.as_ref(), key.as_deref(), true),
        }
    }

    // -----------------------------------------------------------------------
    // Resolve
    // -----------------------------------------------------------------------

    fn stored_id(&self, record: &RecordSnapshot) -> Option<RemoteId> {
        record
            .remote_id
            .clone()
            .or_else(|| self.store.stored_remote_id(record))
    }

    fn resolve_existing(
        &self,
        record: &RecordSnapshot,
        stored: Option<&RemoteId>,
        key: Option<&str>,
    ) -> Result<Option<RemoteRecord>, SyncError> {
        if let Some(id) = stored {
            if let Some(found) = self.directory.get_by_id(record.kind, id)? {
                return Ok(Some(found));
            }
            tracing::warn!(
                "stored {} id {} for {} not found remotely; resolving by natural key",
                record.kind,
                id,
                record.ledger_key()
            );
        }
        match key {
            Some(key) => self.resolve_by_key(record.kind, key),
            None => Ok(None),
        }
    }

    fn resolve_by_key(&self, kind: RecordKind, key: &str) -> Result<Option<RemoteRecord>, SyncError> {
        let found = match kind {
            RecordKind::Contact => {
                self.directory
                    .get_by_natural_key(kind, kind.natural_key_property(), key)?
            }
            RecordKind::Company => {
                matching::find_company(self.directory, key, self.config.name_match_threshold)?
            }
        };
        Ok(found)
    }

    fn write_back(
        &self,
        record: &RecordSnapshot,
        stored: Option<&RemoteId>,
        adopted: &RemoteId,
    ) -> Result<(), SyncError> {
        if stored == Some(adopted) {
            return Ok(());
        }
        tracing::info!("{}: remote id -> {}", record.ledger_key(), adopted);
        self.store.persist_remote_id(record, Some(adopted))
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    fn update_existing(
        &self,
        record: &RecordSnapshot,
        id: RemoteId,
        key: Option<&str>,
        may_repair: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let properties = mapper::build_properties(record, MapVariant::Update)?;

        match self.directory.update(record.kind, &id, &properties) {
            Ok(Some(remote)) => {
                tracing::info!("updated {} {} ({})", record.kind, remote.id, record.ledger_key());
                Ok(SyncOutcome::new(remote, properties, Operation::Updated, MapVariant::Update))
            }
            Ok(None) => {
                tracing::warn!(
                    "{} {} vanished during update of {}",
                    record.kind,
                    id,
                    record.ledger_key()
                );
                let repaired = match (may_repair, key) {
                    (true, Some(key)) => self
                        .resolve_by_key(record.kind, key)?
                        .filter(|found| found.id != id),
                    _ => None,
                };
                match repaired {
                    Some(found) => {
                        self.write_back(record, Some(&id), &found.id)?;
                        self.update_existing(record, found.id, key, false)
                    }
                    None => self.create_new(record, Some(&id), key, false),
                }
            }
            Err(DirectoryError::Validation { message }) => Err(self.validation_failed(
                record,
                message,
                properties,
                MapVariant::Update,
            )),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    fn create_new(
        &self,
        record: &RecordSnapshot,
        stored: Option<&RemoteId>,
        key: Option<&str>,
        recheck: bool,
    ) -> Result<SyncOutcome, SyncError> {
        let properties = mapper::build_properties(record, MapVariant::Create)?;

        if let (true, Some(key)) = (recheck, key) {
            pause(self.config.race_recheck_delay());
            if let Some(found) = self.resolve_by_key(record.kind, key)? {
                tracing::info!(
                    "{} {} appeared before create of {}; updating instead",
                    record.kind,
                    found.id,
                    record.ledger_key()
                );
                self.write_back(record, stored, &found.id)?;
                return self.update_existing(record, found.id, Some(key), false);
            }
        }

        match self.directory.create(record.kind, &properties) {
            Ok(remote) => {
                tracing::info!("created {} {} ({})", record.kind, remote.id, record.ledger_key());
                self.write_back(record, stored, &remote.id)?;
                Ok(SyncOutcome::new(remote, properties, Operation::Created, MapVariant::Create))
            }
            Err(DirectoryError::Conflict {
                message,
                existing_id,
            }) => self.resolve_conflict(record, stored, key, properties, message, existing_id),
            Err(DirectoryError::Validation { message }) => Err(self.validation_failed(
                record,
                message,
                properties,
                MapVariant::Create,
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_conflict(
        &self,
        record: &RecordSnapshot,
        stored: Option<&RemoteId>,
        key: Option<&str>,
        properties: RemoteProperties,
        message: String,
        existing_id: Option<RemoteId>,
    ) -> Result<SyncOutcome, SyncError> {
        tracing::warn!("create of {} conflicted: {message}", record.ledger_key());
        pause(self.config.conflict_recheck_delay());

        let mut found = match key {
            Some(key) => self.resolve_by_key(record.kind, key)?,
            None => None,
        };
        if found.is_none() {
            if let Some(id) = existing_id {
                found = self.directory.get_by_id(record.kind, &id)?;
            }
        }

        match found {
            Some(remote) => {
                tracing::info!(
                    "{}: adopted existing {} {}",
                    record.ledger_key(),
                    record.kind,
                    remote.id
                );
                self.write_back(record, stored, &remote.id)?;
                Ok(SyncOutcome::new(
                    remote,
                    properties,
                    Operation::MatchedExisting,
                    MapVariant::Create,
                ))
            }
            None => Err(SyncError::UnresolvedConflict {
                kind: record.kind,
                local_id: record.local_id.clone(),
                message,
            }),
        }
    }

    fn validation_failed(
        &self,
        record: &RecordSnapshot,
        message: String,
        properties: RemoteProperties,
        variant: MapVariant,
    ) -> SyncError {
        tracing::error!(
            "{} rejected by remote ({variant} map): {message}; properties: {:?}",
            record.ledger_key(),
            properties
        );
        SyncError::Validation {
            kind: record.kind,
            local_id: record.local_id.clone(),
            message,
            properties,
            variant,
        }
    }

    // -----------------------------------------------------------------------
    // Company relation
    // -----------------------------------------------------------------------

    fn ensure_company(&self, company: &RecordSnapshot) -> Result<RemoteId, SyncError> {
        match self.stored_id(company) {
            Some(id) => Ok(id),
            None => Ok(self.reconcile_one(company)?.remote_id),
        }
    }

    fn link_company(
        &self,
        contact_id: &RemoteId,
        company: &RecordSnapshot,
        company_id: RemoteId,
    ) -> Result<CompanyLink, SyncError> {
        if self.associate(contact_id, &company_id)? == Association::Linked {
            return Ok(CompanyLink {
                company_id,
                repaired: false,
            });
        }

        tracing::warn!(
            "company {} missing while linking contact {}; re-syncing {}",
            company_id,
            contact_id,
            company.ledger_key()
        );
        self.store.persist_remote_id(company, None)?;
        let mut fresh = company.clone();
        fresh.remote_id = None;
        let healed = self.reconcile_one(&fresh)?.remote_id;

        match self.associate(contact_id, &healed)? {
            Association::Linked => Ok(CompanyLink {
                company_id: healed,
                repaired: true,
            }),
            Association::TargetMissing => Err(SyncError::AssociationTargetMissing {
                contact_id: contact_id.clone(),
                company_id: healed,
            }),
        }
    }

    fn associate(
        &self,
        contact_id: &RemoteId,
        company_id: &RemoteId,
    ) -> Result<Association, SyncError> {
        Ok(self.directory.associate(
            RecordKind::Contact,
            contact_id,
            RecordKind::Company,
            company_id,
            &AssociationType::Default,
        )?)
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
