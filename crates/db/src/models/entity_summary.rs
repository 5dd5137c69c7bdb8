//! Lightweight entity projection used for recency lists.

use castle_core::entity::EntityType;
use castle_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Identifying columns of any content row.
#[derive(Debug, Clone, FromRow)]
pub struct SummaryRow {
    pub id: DbId,
    pub title: String,
    pub slug: Option<String>,
    pub updated_at: Option<Timestamp>,
}

/// A live entity as shown in a "recently viewed" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySummary {
    pub entity_type: EntityType,
    pub id: DbId,
    pub title: String,
    pub slug: Option<String>,
    pub updated_at: Option<Timestamp>,
}

impl EntitySummary {
    pub fn from_row(entity_type: EntityType, row: SummaryRow) -> Self {
        Self {
            entity_type,
            id: row.id,
            title: row.title,
            slug: row.slug,
            updated_at: row.updated_at,
        }
    }
}
