//! In-process implementations of the capability traits.
//!
//! Used by unit tests and by embedders that run without a database. State
//! lives behind a `std::sync::Mutex`; no lock is held across an await.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::entity::{EntityRef, EntityType};
use crate::error::CoreError;
use crate::preferences::UserPreferences;
use crate::recency::{EntityResolver, PreferenceStore};
use crate::revision::{FieldSource, NewRevision, RevisionPersistence, RevisionRecord};
use crate::search::{AccessPolicy, RawHit, SearchIndex};
use crate::types::DbId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Revisions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RevisionState {
    next_id: DbId,
    records: Vec<RevisionRecord>,
}

/// Revision records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRevisions {
    state: Mutex<RevisionState>,
    fail_next: AtomicBool,
}

impl InMemoryRevisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records for an entity.
    pub fn count(&self, entity: EntityRef) -> usize {
        lock(&self.state)
            .records
            .iter()
            .filter(|r| r.entity() == entity)
            .count()
    }

    /// Make the next `append` fail without writing anything.
    pub fn fail_next_write(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

/// Keep the newest `retain` records of `entity`; returns how many went.
fn retain_newest(records: &mut Vec<RevisionRecord>, entity: EntityRef, retain: usize) -> u64 {
    let mut sequences: Vec<i64> = records
        .iter()
        .filter(|r| r.entity() == entity)
        .map(|r| r.sequence)
        .collect();
    if sequences.len() <= retain {
        return 0;
    }
    sequences.sort_unstable_by(|a, b| b.cmp(a));
    let cutoff = sequences[retain];

    let before = records.len();
    records.retain(|r| r.entity() != entity || r.sequence > cutoff);
    (before - records.len()) as u64
}

#[async_trait]
impl RevisionPersistence for InMemoryRevisions {
    async fn append(
        &self,
        entity: EntityRef,
        records: &[NewRevision],
        retain: Option<usize>,
    ) -> Result<Vec<RevisionRecord>, CoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CoreError::Storage("simulated write failure".into()));
        }

        let mut state = lock(&self.state);
        let mut sequence = state
            .records
            .iter()
            .filter(|r| r.entity() == entity)
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0);

        let now = chrono::Utc::now();
        let mut stored = Vec::with_capacity(records.len());
        for new in records {
            state.next_id += 1;
            sequence += 1;
            stored.push(RevisionRecord {
                id: state.next_id,
                entity_type: entity.entity_type,
                entity_id: entity.id,
                field: new.field.clone(),
                old_value: new.old_value.clone(),
                new_value: new.new_value.clone(),
                actor_id: new.actor_id,
                sequence,
                created_at: now,
            });
        }
        state.records.extend(stored.iter().cloned());

        if let Some(retain) = retain {
            retain_newest(&mut state.records, entity, retain.max(1));
        }
        Ok(stored)
    }

    async fn page(
        &self,
        entity: EntityRef,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<RevisionRecord>, i64), CoreError> {
        let state = lock(&self.state);
        let mut matching: Vec<RevisionRecord> = state
            .records
            .iter()
            .filter(|r| r.entity() == entity)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.sequence.cmp(&a.sequence));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn find(&self, revision_id: DbId) -> Result<Option<RevisionRecord>, CoreError> {
        Ok(lock(&self.state)
            .records
            .iter()
            .find(|r| r.id == revision_id)
            .cloned())
    }

    async fn prune_type(&self, entity_type: EntityType, retain: usize) -> Result<u64, CoreError> {
        let mut state = lock(&self.state);
        let entities: HashSet<EntityRef> = state
            .records
            .iter()
            .filter(|r| r.entity_type == entity_type)
            .map(RevisionRecord::entity)
            .collect();

        let mut deleted = 0;
        for entity in entities {
            deleted += retain_newest(&mut state.records, entity, retain.max(1));
        }
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// Current field values of in-memory entities. An entity exists once any
/// of its fields has been set.
#[derive(Debug, Default)]
pub struct InMemoryFields {
    values: Mutex<HashMap<EntityRef, BTreeMap<String, Option<String>>>>,
}

impl InMemoryFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, entity: EntityRef, field: &str, value: Option<&str>) {
        lock(&self.values)
            .entry(entity)
            .or_default()
            .insert(field.to_string(), value.map(str::to_string));
    }

    pub fn remove_entity(&self, entity: EntityRef) {
        lock(&self.values).remove(&entity);
    }
}

#[async_trait]
impl FieldSource for InMemoryFields {
    async fn current_value(
        &self,
        entity: EntityRef,
        field: &str,
    ) -> Result<Option<String>, CoreError> {
        let values = lock(&self.values);
        let fields = values.get(&entity).ok_or(CoreError::NotFound {
            entity: entity.entity_type.as_str(),
            id: entity.id,
        })?;
        Ok(fields.get(field).cloned().flatten())
    }
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Preference blobs held as raw JSON, parsed on every load like a real
/// store would.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    blobs: Mutex<HashMap<DbId, Value>>,
    saves: AtomicUsize,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user's raw blob.
    pub fn put(&self, user_id: DbId, blob: Value) {
        lock(&self.blobs).insert(user_id, blob);
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferences {
    async fn load(&self, user_id: DbId) -> Result<UserPreferences, CoreError> {
        let blob = lock(&self.blobs).get(&user_id).cloned().unwrap_or(Value::Null);
        UserPreferences::from_value(blob)
    }

    async fn save(&self, user_id: DbId, preferences: &UserPreferences) -> Result<(), CoreError> {
        lock(&self.blobs).insert(user_id, preferences.to_value());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Returns the same hits for every term.
#[derive(Debug, Default)]
pub struct StaticSearchIndex {
    hits: Vec<RawHit>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticSearchIndex {
    pub fn new(hits: Vec<RawHit>) -> Self {
        Self {
            hits,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of queries received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndex for StaticSearchIndex {
    async fn query(&self, _term: &str) -> Result<Vec<RawHit>, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.hits.clone())
    }
}

/// Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingIndex;

#[async_trait]
impl SearchIndex for FailingIndex {
    async fn query(&self, _term: &str) -> Result<Vec<RawHit>, CoreError> {
        Err(CoreError::Storage("search index unavailable".into()))
    }
}

/// Fixed grants per user, or everything for everyone.
#[derive(Debug, Default)]
pub struct StaticAccessPolicy {
    allow_all: bool,
    grants: Mutex<HashMap<DbId, HashSet<EntityType>>>,
}

impl StaticAccessPolicy {
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            grants: Mutex::default(),
        }
    }

    /// A policy granting `user_id` exactly `types`.
    pub fn allow(user_id: DbId, types: impl IntoIterator<Item = EntityType>) -> Self {
        let policy = Self::default();
        policy.grant(user_id, types);
        policy
    }

    pub fn grant(&self, user_id: DbId, types: impl IntoIterator<Item = EntityType>) {
        lock(&self.grants).entry(user_id).or_default().extend(types);
    }
}

#[async_trait]
impl AccessPolicy for StaticAccessPolicy {
    async fn can_view(&self, user_id: DbId, entity_type: EntityType) -> Result<bool, CoreError> {
        if self.allow_all {
            return Ok(true);
        }
        Ok(lock(&self.grants)
            .get(&user_id)
            .is_some_and(|types| types.contains(&entity_type)))
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A minimal live entity: type, id and a display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEntity {
    pub entity_type: EntityType,
    pub id: DbId,
    pub label: String,
}

/// Entities that exist until removed.
#[derive(Debug, Default)]
pub struct InMemoryEntities {
    entities: Mutex<HashMap<EntityRef, String>>,
}

impl InMemoryEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity_type: EntityType, id: DbId, label: impl Into<String>) {
        lock(&self.entities).insert(EntityRef::new(entity_type, id), label.into());
    }

    pub fn remove(&self, entity_type: EntityType, id: DbId) {
        lock(&self.entities).remove(&EntityRef::new(entity_type, id));
    }
}

#[async_trait]
impl EntityResolver for InMemoryEntities {
    type Entity = NamedEntity;

    async fn load_many(
        &self,
        entity_type: EntityType,
        ids: &[DbId],
    ) -> Result<Vec<NamedEntity>, CoreError> {
        let entities = lock(&self.entities);
        Ok(ids
            .iter()
            .filter_map(|id| {
                entities
                    .get(&EntityRef::new(entity_type, *id))
                    .map(|label| NamedEntity {
                        entity_type,
                        id: *id,
                        label: label.clone(),
                    })
            })
            .collect())
    }

    fn id_of(entity: &NamedEntity) -> DbId {
        entity.id
    }
}
