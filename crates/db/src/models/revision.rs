//! Revision model.
//!
//! Rows are immutable once written; the only mutation is retention pruning.

use castle_core::entity::EntityType;
use castle_core::error::CoreError;
use castle_core::revision::RevisionRecord;
use castle_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `revisions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RevisionRow {
    pub id: DbId,
    pub entity_type: String,
    pub entity_id: DbId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor_id: Option<DbId>,
    pub sequence: i64,
    pub created_at: Timestamp,
}

impl TryFrom<RevisionRow> for RevisionRecord {
    type Error = CoreError;

    fn try_from(row: RevisionRow) -> Result<Self, Self::Error> {
        let entity_type: EntityType = row.entity_type.parse()?;
        Ok(RevisionRecord {
            id: row.id,
            entity_type,
            entity_id: row.entity_id,
            field: row.field,
            old_value: row.old_value,
            new_value: row.new_value,
            actor_id: row.actor_id,
            sequence: row.sequence,
            created_at: row.created_at,
        })
    }
}

/// Convert a batch of rows, failing on the first unknown entity type.
pub fn into_records(rows: Vec<RevisionRow>) -> Result<Vec<RevisionRecord>, CoreError> {
    rows.into_iter().map(RevisionRecord::try_from).collect()
}
