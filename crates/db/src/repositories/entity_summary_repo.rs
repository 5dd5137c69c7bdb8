//! Batch loading of live entities for recency lists.

use async_trait::async_trait;
use castle_core::entity::EntityType;
use castle_core::error::CoreError;
use castle_core::recency::EntityResolver;
use castle_core::types::DbId;

use crate::models::entity_summary::{EntitySummary, SummaryRow};
use crate::{storage_error, DbPool};

/// Title and slug expressions per table. Comments have no name, so their
/// text stands in as the title.
fn summary_columns(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Comment => "id, content AS title, NULL::text AS slug, updated_at",
        EntityType::User => "id, name AS title, NULL::text AS slug, updated_at",
        _ => "id, name AS title, slug, updated_at",
    }
}

/// Resolves ids to [`EntitySummary`] rows, skipping soft-deleted rows.
#[derive(Debug, Clone)]
pub struct EntitySummaryRepo {
    pool: DbPool,
}

impl EntitySummaryRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityResolver for EntitySummaryRepo {
    type Entity = EntitySummary;

    async fn load_many(
        &self,
        entity_type: EntityType,
        ids: &[DbId],
    ) -> Result<Vec<EntitySummary>, CoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {} FROM {} WHERE id = ANY($1) AND deleted_at IS NULL",
            summary_columns(entity_type),
            entity_type.table_name()
        );
        let rows = sqlx::query_as::<_, SummaryRow>(&query)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("load entity summaries"))?;

        Ok(rows
            .into_iter()
            .map(|row| EntitySummary::from_row(entity_type, row))
            .collect())
    }

    fn id_of(entity: &EntitySummary) -> DbId {
        entity.id
    }
}
