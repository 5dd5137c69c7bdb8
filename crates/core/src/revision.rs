//! Field-level revision history and restore for versioned entities.
//!
//! Every entity type carries a [`TrackingPolicy`]: a whitelist of fields
//! whose changes are recorded, and an optional retention limit. The
//! whitelist is consulted twice, once when a change is recorded and again
//! when a revision is restored, because policies can change over an
//! entity's lifetime.
//!
//! [`FieldRevisionStore`] owns no storage. Records go through a
//! [`RevisionPersistence`] implementation, which must make the insert and
//! its retention pruning a single atomic unit. Callers that need the
//! records to commit together with the entity update use the `prepare_*`
//! methods and hand the result to a storage layer that writes both in one
//! transaction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RevisionConfig;
use crate::entity::{EntityRef, EntityType};
use crate::error::CoreError;
use crate::search::{clamp_limit, page_count};
use crate::types::{DbId, Timestamp};
use crate::validation::{FieldRules, RestoreValidator};

/// Maximum number of revision records per history page.
pub const MAX_REVISION_PAGE_SIZE: i64 = 100;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Before/after values of one field in a single mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

impl FieldChange {
    pub fn new(old: Option<&str>, new: Option<&str>) -> Self {
        Self {
            old: old.map(str::to_string),
            new: new.map(str::to_string),
        }
    }
}

/// One stored field change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionRecord {
    pub id: DbId,
    pub entity_type: EntityType,
    pub entity_id: DbId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor_id: Option<DbId>,
    /// Strictly increasing per entity.
    pub sequence: i64,
    pub created_at: Timestamp,
}

impl RevisionRecord {
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.entity_type, self.entity_id)
    }
}

/// A record about to be written. Sequence, id and timestamp are assigned
/// by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevision {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor_id: Option<DbId>,
}

/// One page of an entity's history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub records: Vec<RevisionRecord>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl HistoryPage {
    /// Number of the last page (at least 1).
    pub fn last_page(&self) -> i64 {
        page_count(self.total, self.page_size)
    }
}

/// Revision records prepared for one entity but not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRevisions {
    pub entity: EntityRef,
    pub records: Vec<NewRevision>,
    /// Retention to apply in the same write, see [`TrackingPolicy::retain`].
    pub retain: Option<usize>,
}

impl PendingRevisions {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A restore that passed every check but has not been applied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRestore {
    pub revision_id: DbId,
    pub field: String,
    /// Value to write back into the field.
    pub value: Option<String>,
    /// The audit record for the restore, holding exactly one revision.
    pub audit: PendingRevisions,
}

/// Result of restoring a revision: the value the caller must apply, and
/// the audit record written for the restore itself.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub field: String,
    pub value: Option<String>,
    pub audit: RevisionRecord,
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Revision tracking rules for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingPolicy {
    pub enabled: bool,
    pub tracked_fields: BTreeSet<String>,
    /// Records kept per entity when `cleanup` is on. Values below 1 act as 1.
    pub history_limit: usize,
    /// Whether records beyond `history_limit` are discarded.
    pub cleanup: bool,
}

impl TrackingPolicy {
    pub fn new<I, S>(fields: I, history_limit: usize, cleanup: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            tracked_fields: fields.into_iter().map(Into::into).collect(),
            history_limit,
            cleanup,
        }
    }

    /// A policy that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            tracked_fields: BTreeSet::new(),
            history_limit: 0,
            cleanup: false,
        }
    }

    /// Whether changes to `field` are recorded and restorable.
    pub fn tracks(&self, field: &str) -> bool {
        self.enabled && self.tracked_fields.contains(field)
    }

    /// Number of records to keep after an insert, if pruning applies.
    ///
    /// Never zero: the record just written always survives its own prune,
    /// which also keeps the per-entity sequence from restarting.
    pub fn retain(&self) -> Option<usize> {
        (self.enabled && self.cleanup).then_some(self.history_limit.max(1))
    }
}

/// Per-type tracking policies, replaceable at runtime.
#[derive(Debug, Default)]
pub struct RevisionPolicies {
    policies: RwLock<HashMap<EntityType, TrackingPolicy>>,
}

impl RevisionPolicies {
    /// An empty set: no type is tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock policies for content types.
    pub fn with_defaults(config: &RevisionConfig) -> Self {
        let limit = config.history_limit;
        let policies = Self::new();
        policies.set(
            EntityType::Document,
            TrackingPolicy::new(["name", "slug", "content"], limit, true),
        );
        policies.set(
            EntityType::Discussion,
            TrackingPolicy::new(["name", "slug", "content"], limit, true),
        );
        policies.set(
            EntityType::Resource,
            TrackingPolicy::new(["name", "slug", "description", "metadata"], limit, false),
        );
        policies.set(
            EntityType::Comment,
            TrackingPolicy::new(["content"], limit, true),
        );
        policies
    }

    /// Install or replace the policy for a type.
    pub fn set(&self, entity_type: EntityType, policy: TrackingPolicy) {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_type, policy);
    }

    /// Current policy for a type; untracked types get a disabled policy.
    pub fn get(&self, entity_type: EntityType) -> TrackingPolicy {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entity_type)
            .cloned()
            .unwrap_or_else(TrackingPolicy::disabled)
    }

    /// Types whose policy discards old records, in stable order.
    pub fn types_with_cleanup(&self) -> Vec<EntityType> {
        let guard = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        let mut types: Vec<EntityType> = guard
            .iter()
            .filter(|(_, p)| p.retain().is_some())
            .map(|(t, _)| *t)
            .collect();
        types.sort();
        types
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Storage for revision records.
#[async_trait]
pub trait RevisionPersistence: Send + Sync {
    /// Insert `records` for `entity`, assigning increasing sequence numbers
    /// in slice order. When `retain` is set, the oldest records beyond that
    /// count are deleted; a `retain` of 0 is treated as 1 so the newest
    /// record always survives. Insert and delete must commit or fail together.
    async fn append(
        &self,
        entity: EntityRef,
        records: &[NewRevision],
        retain: Option<usize>,
    ) -> Result<Vec<RevisionRecord>, CoreError>;

    /// Records for `entity`, newest first, plus the total count.
    async fn page(
        &self,
        entity: EntityRef,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<RevisionRecord>, i64), CoreError>;

    async fn find(&self, revision_id: DbId) -> Result<Option<RevisionRecord>, CoreError>;

    /// Trim every entity of `entity_type` to its newest `retain` records
    /// (at least one). Returns the number of deleted records.
    async fn prune_type(&self, entity_type: EntityType, retain: usize) -> Result<u64, CoreError>;
}

/// Read access to an entity's current field values.
#[async_trait]
pub trait FieldSource: Send + Sync {
    /// Current value of `field`. Fails with `NotFound` if the entity does
    /// not exist.
    async fn current_value(&self, entity: EntityRef, field: &str)
        -> Result<Option<String>, CoreError>;
}

// ---------------------------------------------------------------------------
// FieldRevisionStore
// ---------------------------------------------------------------------------

/// Records field changes and restores individual revisions.
pub struct FieldRevisionStore {
    persistence: Arc<dyn RevisionPersistence>,
    fields: Arc<dyn FieldSource>,
    validator: Arc<dyn RestoreValidator>,
    policies: Arc<RevisionPolicies>,
    config: RevisionConfig,
}

impl FieldRevisionStore {
    pub fn new(
        persistence: Arc<dyn RevisionPersistence>,
        fields: Arc<dyn FieldSource>,
        policies: Arc<RevisionPolicies>,
        config: RevisionConfig,
    ) -> Self {
        Self {
            persistence,
            fields,
            validator: Arc::new(FieldRules),
            policies,
            config,
        }
    }

    /// Replace the validator applied to restored values.
    pub fn with_validator(mut self, validator: Arc<dyn RestoreValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn policies(&self) -> &RevisionPolicies {
        &self.policies
    }

    /// Filter `changes` down to the records the type's current whitelist
    /// allows, without writing anything.
    ///
    /// Untracked fields are dropped with a warning; they are not an error.
    pub fn prepare_change(
        &self,
        entity_type: EntityType,
        entity_id: DbId,
        actor_id: Option<DbId>,
        changes: &BTreeMap<String, FieldChange>,
    ) -> PendingRevisions {
        let policy = self.policies.get(entity_type);
        let entity = EntityRef::new(entity_type, entity_id);

        let mut records = Vec::with_capacity(changes.len());
        for (field, change) in changes {
            if !policy.tracks(field) {
                tracing::warn!(%entity, field = %field, "Dropping change to untracked field");
                continue;
            }
            records.push(NewRevision {
                field: field.clone(),
                old_value: change.old.clone(),
                new_value: change.new.clone(),
                actor_id,
            });
        }

        PendingRevisions {
            entity,
            records,
            retain: policy.retain(),
        }
    }

    /// Record the tracked subset of `changes` for an entity.
    ///
    /// Returns the stored records, in field-name order.
    pub async fn record_change(
        &self,
        entity_type: EntityType,
        entity_id: DbId,
        actor_id: Option<DbId>,
        changes: &BTreeMap<String, FieldChange>,
    ) -> Result<Vec<RevisionRecord>, CoreError> {
        let pending = self.prepare_change(entity_type, entity_id, actor_id, changes);
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self
            .persistence
            .append(pending.entity, &pending.records, pending.retain)
            .await?;

        tracing::debug!(
            entity = %pending.entity,
            actor_id = ?actor_id,
            count = stored.len(),
            "Recorded field revisions"
        );
        Ok(stored)
    }

    /// One page of an entity's history, newest first.
    ///
    /// `page` is 1-based; values below 1 are treated as 1. `page_size`
    /// falls back to the configured default and is capped at
    /// [`MAX_REVISION_PAGE_SIZE`].
    pub async fn history(
        &self,
        entity_type: EntityType,
        entity_id: DbId,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> Result<HistoryPage, CoreError> {
        let page = page.unwrap_or(1).max(1);
        let page_size = clamp_limit(page_size, self.config.page_size, MAX_REVISION_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(page_size);

        let (records, total) = self
            .persistence
            .page(EntityRef::new(entity_type, entity_id), offset, page_size)
            .await?;

        Ok(HistoryPage {
            records,
            total,
            page,
            page_size,
        })
    }

    /// Check that a revision can be restored and build its audit record,
    /// without writing anything.
    ///
    /// The audit record has old = the value being overwritten and new = the
    /// restored value.
    pub async fn prepare_restore(
        &self,
        entity_type: EntityType,
        entity_id: DbId,
        revision_id: DbId,
        actor_id: Option<DbId>,
    ) -> Result<PendingRestore, CoreError> {
        let entity = EntityRef::new(entity_type, entity_id);

        let revision = self
            .persistence
            .find(revision_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "revision",
                id: revision_id,
            })?;

        if revision.entity() != entity {
            tracing::error!(
                revision_id,
                requested = %entity,
                actual = %revision.entity(),
                "Revision does not belong to the requested entity"
            );
            return Err(CoreError::PreconditionViolation(format!(
                "revision {revision_id} belongs to {}, not {entity}",
                revision.entity()
            )));
        }

        let policy = self.policies.get(entity_type);
        if !policy.tracks(&revision.field) {
            return Err(CoreError::Validation(format!(
                "The property \"{}\" for this {entity_type} could not be restored",
                revision.field
            )));
        }

        let restored = revision.old_value.clone();
        self.validator
            .validate(entity, &revision.field, restored.as_deref())
            .await?;

        let current = self.fields.current_value(entity, &revision.field).await?;

        let audit = NewRevision {
            field: revision.field.clone(),
            old_value: current,
            new_value: restored.clone(),
            actor_id,
        };
        Ok(PendingRestore {
            revision_id,
            field: revision.field,
            value: restored,
            audit: PendingRevisions {
                entity,
                records: vec![audit],
                retain: policy.retain(),
            },
        })
    }

    /// Restore the old value of a single revision.
    ///
    /// Only the audit record is written here; the returned value must be
    /// applied to the entity by the caller. Use [`Self::prepare_restore`]
    /// when the value and its audit record have to commit together.
    /// Restoring the same revision twice is allowed; each call writes its
    /// own audit record.
    pub async fn restore(
        &self,
        entity_type: EntityType,
        entity_id: DbId,
        revision_id: DbId,
        actor_id: Option<DbId>,
    ) -> Result<RestoreOutcome, CoreError> {
        let pending = self
            .prepare_restore(entity_type, entity_id, revision_id, actor_id)
            .await?;
        let entity = pending.audit.entity;

        let mut stored = self
            .persistence
            .append(entity, &pending.audit.records, pending.audit.retain)
            .await?;
        let audit = stored.pop().ok_or_else(|| {
            CoreError::Storage(format!(
                "no audit record returned when restoring revision {revision_id}"
            ))
        })?;

        tracing::info!(
            %entity,
            revision_id,
            field = %pending.field,
            actor_id = ?actor_id,
            "Restored field revision"
        );

        Ok(RestoreOutcome {
            field: pending.field,
            value: pending.value,
            audit,
        })
    }

    /// Trim every entity of a type to its policy's history limit. Types
    /// without cleanup are left alone.
    pub async fn enforce_history_limit(&self, entity_type: EntityType) -> Result<u64, CoreError> {
        let Some(retain) = self.policies.get(entity_type).retain() else {
            return Ok(0);
        };

        let deleted = self.persistence.prune_type(entity_type, retain).await?;
        tracing::info!(%entity_type, retain, deleted, "Enforced revision history limit");
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryFields, InMemoryRevisions};
    use assert_matches::assert_matches;

    struct Fixture {
        store: FieldRevisionStore,
        revisions: Arc<InMemoryRevisions>,
        fields: Arc<InMemoryFields>,
        policies: Arc<RevisionPolicies>,
    }

    fn fixture(limit: usize) -> Fixture {
        let revisions = Arc::new(InMemoryRevisions::new());
        let fields = Arc::new(InMemoryFields::new());
        let config = RevisionConfig {
            history_limit: limit,
            page_size: 10,
        };
        let policies = Arc::new(RevisionPolicies::with_defaults(&config));
        let store = FieldRevisionStore::new(
            revisions.clone(),
            fields.clone(),
            policies.clone(),
            config,
        );
        Fixture {
            store,
            revisions,
            fields,
            policies,
        }
    }

    fn change(field: &str, old: &str, new: &str) -> BTreeMap<String, FieldChange> {
        BTreeMap::from([(field.to_string(), FieldChange::new(Some(old), Some(new)))])
    }

    const DOC: EntityType = EntityType::Document;

    // -- record_change --------------------------------------------------------

    #[tokio::test]
    async fn records_only_whitelisted_fields() {
        let f = fixture(100);
        let mut changes = change("name", "Old", "New");
        changes.insert("updated_by".into(), FieldChange::new(Some("1"), Some("2")));

        let stored = f.store.record_change(DOC, 1, Some(7), &changes).await.unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].field, "name");
        assert_eq!(stored[0].actor_id, Some(7));
        assert_eq!(f.revisions.count(EntityRef::new(DOC, 1)), 1);
    }

    #[tokio::test]
    async fn untracked_type_records_nothing() {
        let f = fixture(100);
        let stored = f
            .store
            .record_change(EntityType::Tag, 1, None, &change("name", "a", "b"))
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn sequences_increase_per_entity() {
        let f = fixture(100);
        let a = f.store.record_change(DOC, 1, None, &change("name", "a", "b")).await.unwrap();
        let b = f.store.record_change(DOC, 1, None, &change("name", "b", "c")).await.unwrap();
        let other = f.store.record_change(DOC, 2, None, &change("name", "x", "y")).await.unwrap();
        assert!(b[0].sequence > a[0].sequence);
        assert_eq!(other[0].sequence, 1);
    }

    #[tokio::test]
    async fn pruning_keeps_history_limit_records() {
        let f = fixture(100);
        let entity = EntityRef::new(DOC, 1);
        let mut first_id = None;
        for i in 0..101 {
            let stored = f
                .store
                .record_change(
                    DOC,
                    1,
                    None,
                    &change("content", &i.to_string(), &(i + 1).to_string()),
                )
                .await
                .unwrap();
            first_id.get_or_insert(stored[0].id);
        }

        assert_eq!(f.revisions.count(entity), 100);
        let oldest = first_id.unwrap();
        assert!(f.revisions.find(oldest).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_pruning_without_cleanup() {
        let f = fixture(3);
        for i in 0..5 {
            f.store
                .record_change(EntityType::Resource, 1, None, &change("name", &i.to_string(), "x"))
                .await
                .unwrap();
        }
        assert_eq!(f.revisions.count(EntityRef::new(EntityType::Resource, 1)), 5);
    }

    #[tokio::test]
    async fn failed_append_leaves_history_unchanged() {
        let f = fixture(100);
        f.store.record_change(DOC, 1, None, &change("name", "a", "b")).await.unwrap();
        f.revisions.fail_next_write();
        let result = f.store.record_change(DOC, 1, None, &change("name", "b", "c")).await;
        assert_matches!(result, Err(CoreError::Storage(_)));
        assert_eq!(f.revisions.count(EntityRef::new(DOC, 1)), 1);
    }

    #[tokio::test]
    async fn zero_history_limit_still_keeps_the_newest_record() {
        let f = fixture(100);
        let entity = EntityRef::new(DOC, 1);
        f.policies.set(DOC, TrackingPolicy::new(["name"], 0, true));

        let first = f.store.record_change(DOC, 1, None, &change("name", "a", "b")).await.unwrap();
        let second = f.store.record_change(DOC, 1, None, &change("name", "b", "c")).await.unwrap();

        assert!(second[0].sequence > first[0].sequence);
        let history = f.store.history(DOC, 1, None, None).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.records[0].id, second[0].id);

        f.fields.set(entity, "name", Some("c"));
        let outcome = f.store.restore(DOC, 1, second[0].id, None).await.unwrap();
        assert_eq!(outcome.value.as_deref(), Some("b"));
        assert!(outcome.audit.sequence > second[0].sequence);
        assert_eq!(f.revisions.count(entity), 1);
    }

    #[test]
    fn retain_is_never_zero() {
        assert_eq!(TrackingPolicy::new(["name"], 0, true).retain(), Some(1));
        assert_eq!(TrackingPolicy::new(["name"], 5, true).retain(), Some(5));
        assert_eq!(TrackingPolicy::new(["name"], 0, false).retain(), None);
    }

    #[tokio::test]
    async fn prepare_change_writes_nothing() {
        let f = fixture(100);
        let mut changes = change("name", "a", "b");
        changes.insert("updated_by".into(), FieldChange::new(Some("1"), Some("2")));

        let pending = f.store.prepare_change(DOC, 1, Some(3), &changes);

        assert_eq!(pending.entity, EntityRef::new(DOC, 1));
        assert_eq!(pending.records.len(), 1);
        assert_eq!(pending.records[0].field, "name");
        assert_eq!(pending.retain, Some(100));
        assert_eq!(f.revisions.count(EntityRef::new(DOC, 1)), 0);
    }

    // -- history ----------------------------------------------------------------

    #[tokio::test]
    async fn history_is_newest_first_and_paginated() {
        let f = fixture(100);
        for i in 0..12 {
            f.store
                .record_change(
                    DOC,
                    1,
                    None,
                    &change("name", &format!("v{i}"), &format!("v{}", i + 1)),
                )
                .await
                .unwrap();
        }

        let first = f.store.history(DOC, 1, Some(1), None).await.unwrap();
        assert_eq!(first.total, 12);
        assert_eq!(first.records.len(), 10);
        assert_eq!(first.records[0].new_value.as_deref(), Some("v12"));
        assert_eq!(first.last_page(), 2);

        let second = f.store.history(DOC, 1, Some(2), None).await.unwrap();
        assert_eq!(second.records.len(), 2);
        assert_eq!(second.records[1].new_value.as_deref(), Some("v1"));
    }

    // -- restore ----------------------------------------------------------------

    #[tokio::test]
    async fn restore_returns_old_value_and_audits_itself() {
        let f = fixture(100);
        let entity = EntityRef::new(DOC, 1);
        let rec = f
            .store
            .record_change(DOC, 1, Some(1), &change("name", "Old", "New"))
            .await
            .unwrap();
        f.fields.set(entity, "name", Some("New"));

        let outcome = f.store.restore(DOC, 1, rec[0].id, Some(2)).await.unwrap();

        assert_eq!(outcome.field, "name");
        assert_eq!(outcome.value.as_deref(), Some("Old"));
        assert_eq!(outcome.audit.old_value.as_deref(), Some("New"));
        assert_eq!(outcome.audit.new_value.as_deref(), Some("Old"));
        assert_eq!(outcome.audit.actor_id, Some(2));
        assert_eq!(f.revisions.count(entity), 2);
    }

    #[tokio::test]
    async fn restoring_twice_appends_two_audit_records() {
        let f = fixture(100);
        let entity = EntityRef::new(DOC, 1);
        let rec = f.store.record_change(DOC, 1, None, &change("name", "Old", "New")).await.unwrap();
        f.fields.set(entity, "name", Some("New"));

        let first = f.store.restore(DOC, 1, rec[0].id, None).await.unwrap();
        let second = f.store.restore(DOC, 1, rec[0].id, None).await.unwrap();

        assert_eq!(first.value, second.value);
        assert_ne!(first.audit.id, second.audit.id);
        assert_eq!(f.revisions.count(entity), 3);
    }

    #[tokio::test]
    async fn prepare_restore_checks_without_writing() {
        let f = fixture(100);
        let entity = EntityRef::new(DOC, 1);
        let rec = f
            .store
            .record_change(DOC, 1, None, &change("name", "Old", "New"))
            .await
            .unwrap();
        f.fields.set(entity, "name", Some("New"));

        let pending = f.store.prepare_restore(DOC, 1, rec[0].id, Some(4)).await.unwrap();

        assert_eq!(pending.revision_id, rec[0].id);
        assert_eq!(pending.field, "name");
        assert_eq!(pending.value.as_deref(), Some("Old"));
        assert_eq!(pending.audit.records.len(), 1);
        assert_eq!(pending.audit.records[0].old_value.as_deref(), Some("New"));
        assert_eq!(pending.audit.records[0].actor_id, Some(4));
        assert_eq!(f.revisions.count(entity), 1);
    }

    #[test]
    fn history_last_page_survives_zero_page_size() {
        let page = HistoryPage {
            records: Vec::new(),
            total: 3,
            page: 1,
            page_size: 0,
        };
        assert_eq!(page.last_page(), 3);
    }

    #[tokio::test]
    async fn restore_unknown_revision_is_not_found() {
        let f = fixture(100);
        let result = f.store.restore(DOC, 1, 999, None).await;
        assert_matches!(result, Err(CoreError::NotFound { entity: "revision", id: 999 }));
    }

    #[tokio::test]
    async fn restore_with_mismatched_entity_is_a_precondition_violation() {
        let f = fixture(100);
        let rec = f.store.record_change(DOC, 1, None, &change("name", "a", "b")).await.unwrap();

        let wrong_id = f.store.restore(DOC, 2, rec[0].id, None).await;
        assert_matches!(wrong_id, Err(CoreError::PreconditionViolation(_)));

        let wrong_type = f.store.restore(EntityType::Discussion, 1, rec[0].id, None).await;
        assert_matches!(wrong_type, Err(CoreError::PreconditionViolation(_)));
    }

    #[tokio::test]
    async fn shrunk_whitelist_makes_old_records_unrestorable() {
        let f = fixture(100);
        let entity = EntityRef::new(DOC, 1);
        let rec = f
            .store
            .record_change(DOC, 1, None, &change("slug", "old-slug", "new-slug"))
            .await
            .unwrap();
        f.fields.set(entity, "slug", Some("new-slug"));

        f.policies.set(DOC, TrackingPolicy::new(["name", "content"], 100, true));

        let history = f.store.history(DOC, 1, None, None).await.unwrap();
        assert_eq!(history.records.len(), 1, "existing records stay visible");

        let result = f.store.restore(DOC, 1, rec[0].id, None).await;
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("slug"));
        assert_eq!(f.revisions.count(entity), 1, "nothing written on rejection");
    }

    #[tokio::test]
    async fn restored_value_is_revalidated() {
        let f = fixture(100);
        let entity = EntityRef::new(DOC, 1);
        // Recorded before "edit" became a reserved slug.
        let rec = f
            .store
            .record_change(DOC, 1, None, &change("slug", "edit", "runbook"))
            .await
            .unwrap();
        f.fields.set(entity, "slug", Some("runbook"));

        let result = f.store.restore(DOC, 1, rec[0].id, None).await;
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("reserved"));
        assert_eq!(f.revisions.count(entity), 1);
    }

    #[tokio::test]
    async fn restore_of_missing_entity_is_not_found() {
        let f = fixture(100);
        let rec = f.store.record_change(DOC, 5, None, &change("name", "a", "b")).await.unwrap();
        let result = f.store.restore(DOC, 5, rec[0].id, None).await;
        assert_matches!(result, Err(CoreError::NotFound { .. }));
    }

    // -- enforce_history_limit ------------------------------------------------

    #[tokio::test]
    async fn lowering_the_limit_and_sweeping_trims_history() {
        let f = fixture(100);
        for id in [1, 2] {
            for i in 0..6 {
                f.store
                    .record_change(DOC, id, None, &change("name", &i.to_string(), "x"))
                    .await
                    .unwrap();
            }
        }

        f.policies.set(DOC, TrackingPolicy::new(["name"], 4, true));
        let deleted = f.store.enforce_history_limit(DOC).await.unwrap();

        assert_eq!(deleted, 4);
        assert_eq!(f.revisions.count(EntityRef::new(DOC, 1)), 4);
        assert_eq!(f.revisions.count(EntityRef::new(DOC, 2)), 4);
    }

    #[tokio::test]
    async fn sweep_skips_types_without_cleanup() {
        let f = fixture(1);
        for i in 0..3 {
            f.store
                .record_change(EntityType::Resource, 1, None, &change("name", &i.to_string(), "x"))
                .await
                .unwrap();
        }
        assert_eq!(f.store.enforce_history_limit(EntityType::Resource).await.unwrap(), 0);
    }

    #[test]
    fn default_policies_with_cleanup() {
        let policies = RevisionPolicies::with_defaults(&RevisionConfig::default());
        assert_eq!(
            policies.types_with_cleanup(),
            vec![EntityType::Comment, EntityType::Discussion, EntityType::Document]
        );
        assert!(policies.get(EntityType::Resource).tracks("metadata"));
        assert!(!policies.get(EntityType::Tag).tracks("name"));
    }
}
