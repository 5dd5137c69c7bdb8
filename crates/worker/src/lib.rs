//! Revision retention sweep.
//!
//! Request-time pruning only trims the entity being written. After a
//! history limit is lowered, the sweep brings every entity of each
//! cleanup-enabled type down to the new limit.

use std::sync::Arc;

use castle_core::config::CastleConfig;
use castle_core::entity::EntityType;
use castle_core::error::CoreError;
use castle_core::revision::{FieldRevisionStore, RevisionPolicies};
use castle_db::repositories::{ColumnFieldSource, RevisionRepo, SlugUniquenessValidator};
use castle_db::DbPool;

/// Deleted record counts per swept type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub per_type: Vec<(EntityType, u64)>,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.per_type.iter().map(|(_, n)| n).sum()
    }
}

/// Wire a revision store to PostgreSQL with the default policies.
pub fn revision_store(pool: DbPool, config: &CastleConfig) -> FieldRevisionStore {
    FieldRevisionStore::new(
        Arc::new(RevisionRepo::new(pool.clone())),
        Arc::new(ColumnFieldSource::new(pool.clone())),
        Arc::new(RevisionPolicies::with_defaults(&config.revisions)),
        config.revisions.clone(),
    )
    .with_validator(Arc::new(SlugUniquenessValidator::new(pool)))
}

/// Enforce the history limit of every type whose policy has cleanup on.
pub async fn run_retention_sweep(store: &FieldRevisionStore) -> Result<SweepReport, CoreError> {
    let mut report = SweepReport::default();
    for entity_type in store.policies().types_with_cleanup() {
        let deleted = store.enforce_history_limit(entity_type).await?;
        tracing::info!(%entity_type, deleted, "Swept revision history");
        report.per_type.push((entity_type, deleted));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use castle_core::config::RevisionConfig;
    use castle_core::entity::EntityRef;
    use castle_core::memory::{InMemoryFields, InMemoryRevisions};
    use castle_core::revision::{FieldChange, TrackingPolicy};

    #[tokio::test]
    async fn sweep_covers_only_cleanup_types() {
        let revisions = Arc::new(InMemoryRevisions::new());
        let config = RevisionConfig {
            history_limit: 10,
            page_size: 10,
        };
        let policies = Arc::new(RevisionPolicies::with_defaults(&config));
        let store = FieldRevisionStore::new(
            revisions.clone(),
            Arc::new(InMemoryFields::new()),
            policies.clone(),
            config,
        );

        for i in 0..5 {
            let changes = BTreeMap::from([(
                "name".to_string(),
                FieldChange::new(Some(i.to_string().as_str()), Some("next")),
            )]);
            store.record_change(EntityType::Document, 1, None, &changes).await.unwrap();
            store.record_change(EntityType::Resource, 1, None, &changes).await.unwrap();
        }

        policies.set(EntityType::Document, TrackingPolicy::new(["name"], 2, true));
        policies.set(EntityType::Resource, TrackingPolicy::new(["name"], 2, false));

        let report = run_retention_sweep(&store).await.unwrap();

        assert_eq!(report.total(), 3);
        assert!(report.per_type.contains(&(EntityType::Document, 3)));
        assert!(!report.per_type.iter().any(|(t, _)| *t == EntityType::Resource));
        assert_eq!(revisions.count(EntityRef::new(EntityType::Document, 1)), 2);
        assert_eq!(revisions.count(EntityRef::new(EntityType::Resource, 1)), 5);
    }
}
