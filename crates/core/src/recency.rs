//! Per-user "recently viewed" lists.
//!
//! The lists live inside the user's preference blob and are
//! read-modify-written as a whole. Concurrent writers for the same user
//! race and the last save wins. Ids of deleted entities are filtered out
//! when lists are resolved and only removed from storage by a later
//! [`RecencyTracker::prune`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RecencyConfig;
use crate::entity::EntityType;
use crate::error::CoreError;
use crate::preferences::{RecencyHistory, UserPreferences};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Load/save of a user's preference blob.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load(&self, user_id: DbId) -> Result<UserPreferences, CoreError>;
    async fn save(&self, user_id: DbId, preferences: &UserPreferences) -> Result<(), CoreError>;
}

/// Batch loader for live entities.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    type Entity: Send;

    /// Load the entities among `ids` that still exist, in any order.
    async fn load_many(
        &self,
        entity_type: EntityType,
        ids: &[DbId],
    ) -> Result<Vec<Self::Entity>, CoreError>;

    fn id_of(entity: &Self::Entity) -> DbId;
}

// ---------------------------------------------------------------------------
// RecencyTracker
// ---------------------------------------------------------------------------

pub struct RecencyTracker {
    store: Arc<dyn PreferenceStore>,
    config: RecencyConfig,
}

impl RecencyTracker {
    pub fn new(store: Arc<dyn PreferenceStore>, config: RecencyConfig) -> Self {
        Self { store, config }
    }

    /// Mark an entity as just viewed.
    ///
    /// Moves the id to the newest position and evicts from the oldest end
    /// beyond the type's maximum size. Returns whether anything was saved.
    pub async fn touch(
        &self,
        user_id: DbId,
        entity_type: EntityType,
        entity_id: DbId,
    ) -> Result<bool, CoreError> {
        let mut prefs = self.store.load(user_id).await?;
        let before = prefs.history.ids(entity_type).to_vec();

        let list = prefs.history.ids_mut(entity_type);
        list.retain(|id| *id != entity_id);
        list.push(entity_id);
        truncate_oldest(list, self.config.max_size(entity_type));

        if prefs.history.ids(entity_type) == before.as_slice() {
            return Ok(false);
        }

        self.store.save(user_id, &prefs).await?;
        tracing::debug!(user_id, %entity_type, entity_id, "Touched recency list");
        Ok(true)
    }

    /// Live entities for one tracked type, newest first.
    pub async fn resolve_type<R: EntityResolver>(
        &self,
        resolver: &R,
        user_id: DbId,
        entity_type: EntityType,
    ) -> Result<Vec<R::Entity>, CoreError> {
        let prefs = self.store.load(user_id).await?;
        resolve_list(resolver, entity_type, prefs.history.ids(entity_type)).await
    }

    /// Live entities per tracked type, each list newest first.
    ///
    /// With `Some(type)` only that key is returned, holding an empty list
    /// when the type is untracked. Stale ids are skipped, never written
    /// back.
    pub async fn resolve<R: EntityResolver>(
        &self,
        resolver: &R,
        user_id: DbId,
        entity_type: Option<EntityType>,
    ) -> Result<BTreeMap<EntityType, Vec<R::Entity>>, CoreError> {
        let prefs = self.store.load(user_id).await?;

        let types: Vec<EntityType> = match entity_type {
            Some(t) => vec![t],
            None => prefs.history.types().collect(),
        };

        let mut resolved = BTreeMap::new();
        for t in types {
            let entities = resolve_list(resolver, t, prefs.history.ids(t)).await?;
            resolved.insert(t, entities);
        }
        Ok(resolved)
    }

    /// Drop stale ids and trim every list to its maximum size.
    ///
    /// Saves only when something changed. Returns the number of removed ids.
    pub async fn prune<R: EntityResolver>(
        &self,
        resolver: &R,
        user_id: DbId,
    ) -> Result<usize, CoreError> {
        let mut prefs = self.store.load(user_id).await?;
        let mut pruned = RecencyHistory::new();
        let mut removed = 0;

        for (entity_type, ids) in prefs.history.iter() {
            let live: Vec<DbId> = resolver
                .load_many(entity_type, ids)
                .await?
                .iter()
                .map(R::id_of)
                .collect();

            let mut kept: Vec<DbId> = ids.iter().copied().filter(|id| live.contains(id)).collect();
            truncate_oldest(&mut kept, self.config.max_size(entity_type));
            removed += ids.len() - kept.len();
            pruned.set(entity_type, kept);
        }

        if removed == 0 {
            return Ok(0);
        }

        prefs.history = pruned;
        self.store.save(user_id, &prefs).await?;
        tracing::info!(user_id, removed, "Pruned recency lists");
        Ok(removed)
    }

    /// Forget one type's list, or all of them.
    pub async fn clear(
        &self,
        user_id: DbId,
        entity_type: Option<EntityType>,
    ) -> Result<(), CoreError> {
        let mut prefs = self.store.load(user_id).await?;
        if prefs.history.is_empty() {
            return Ok(());
        }

        match entity_type {
            Some(t) => {
                if prefs.history.remove(t).is_none() {
                    return Ok(());
                }
            }
            None => prefs.history.clear(),
        }

        self.store.save(user_id, &prefs).await?;
        tracing::debug!(user_id, entity_type = ?entity_type, "Cleared recency history");
        Ok(())
    }
}

/// Drop entries from the front (oldest) until `list.len() <= max`.
fn truncate_oldest(list: &mut Vec<DbId>, max: usize) {
    if list.len() > max {
        list.drain(..list.len() - max);
    }
}

async fn resolve_list<R: EntityResolver>(
    resolver: &R,
    entity_type: EntityType,
    ids: &[DbId],
) -> Result<Vec<R::Entity>, CoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut by_id: HashMap<DbId, R::Entity> = resolver
        .load_many(entity_type, ids)
        .await?
        .into_iter()
        .map(|e| (R::id_of(&e), e))
        .collect();

    let entities: Vec<R::Entity> = ids.iter().rev().filter_map(|id| by_id.remove(id)).collect();
    if entities.len() < ids.len() {
        tracing::debug!(
            %entity_type,
            stale = ids.len() - entities.len(),
            "Skipping recency entries for missing entities"
        );
    }
    Ok(entities)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
