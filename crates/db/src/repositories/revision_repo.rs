//! Repository for the `revisions` table.
//!
//! Appends run in one transaction that takes a per-entity advisory lock,
//! assigns `MAX(sequence) + 1`, inserts, and prunes. Concurrent writers
//! for the same entity serialize on the lock; other entities are unaffected.
//!
//! [`RevisionRepo::append_in`] runs the same steps on a connection the
//! caller already holds, so the records commit or roll back with the
//! caller's own entity update.

use async_trait::async_trait;
use castle_core::entity::{EntityRef, EntityType};
use castle_core::error::CoreError;
use castle_core::revision::{NewRevision, RevisionPersistence, RevisionRecord};
use castle_core::types::DbId;
use sqlx::PgConnection;

use crate::models::revision::{into_records, RevisionRow};
use crate::{storage_error, DbPool};

/// Column list for `revisions` queries.
const COLUMNS: &str = "\
    id, entity_type, entity_id, field, old_value, new_value, \
    actor_id, sequence, created_at";

/// Stores revision records in PostgreSQL.
#[derive(Debug, Clone)]
pub struct RevisionRepo {
    pool: DbPool,
}

impl RevisionRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of stored records for an entity.
    pub async fn count_for(&self, entity: EntityRef) -> Result<i64, CoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM revisions WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(entity.entity_type.as_str())
        .bind(entity.id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error("count revisions"))?;
        Ok(count)
    }

    /// Append `records` inside the caller's transaction.
    ///
    /// The advisory lock is transaction-scoped, so it is held until the
    /// caller commits or rolls back.
    pub async fn append_in(
        conn: &mut PgConnection,
        entity: EntityRef,
        records: &[NewRevision],
        retain: Option<usize>,
    ) -> Result<Vec<RevisionRecord>, CoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("revisions:{entity}"))
            .execute(&mut *conn)
            .await
            .map_err(storage_error("lock revision history"))?;

        let (mut sequence,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) FROM revisions \
             WHERE entity_type = $1 AND entity_id = $2",
        )
        .bind(entity.entity_type.as_str())
        .bind(entity.id)
        .fetch_one(&mut *conn)
        .await
        .map_err(storage_error("read revision sequence"))?;

        let insert = format!(
            "INSERT INTO revisions \
                 (entity_type, entity_id, field, old_value, new_value, actor_id, sequence) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );

        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            sequence += 1;
            let row = sqlx::query_as::<_, RevisionRow>(&insert)
                .bind(entity.entity_type.as_str())
                .bind(entity.id)
                .bind(&record.field)
                .bind(&record.old_value)
                .bind(&record.new_value)
                .bind(record.actor_id)
                .bind(sequence)
                .fetch_one(&mut *conn)
                .await
                .map_err(storage_error("insert revision"))?;
            rows.push(row);
        }

        if let Some(retain) = retain {
            let deleted = sqlx::query(
                "DELETE FROM revisions WHERE id IN ( \
                     SELECT id FROM revisions \
                     WHERE entity_type = $1 AND entity_id = $2 \
                     ORDER BY sequence DESC \
                     OFFSET $3)",
            )
            .bind(entity.entity_type.as_str())
            .bind(entity.id)
            .bind(retain.max(1) as i64)
            .execute(&mut *conn)
            .await
            .map_err(storage_error("prune revisions"))?
            .rows_affected();

            if deleted > 0 {
                tracing::debug!(%entity, deleted, retain, "Pruned revision history");
            }
        }

        into_records(rows)
    }
}

#[async_trait]
impl RevisionPersistence for RevisionRepo {
    async fn append(
        &self,
        entity: EntityRef,
        records: &[NewRevision],
        retain: Option<usize>,
    ) -> Result<Vec<RevisionRecord>, CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("begin revision append"))?;

        let stored = Self::append_in(&mut *tx, entity, records, retain).await?;

        tx.commit()
            .await
            .map_err(storage_error("commit revision append"))?;

        Ok(stored)
    }

    async fn page(
        &self,
        entity: EntityRef,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<RevisionRecord>, i64), CoreError> {
        let total = self.count_for(entity).await?;

        let query = format!(
            "SELECT {COLUMNS} FROM revisions \
             WHERE entity_type = $1 AND entity_id = $2 \
             ORDER BY sequence DESC \
             LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, RevisionRow>(&query)
            .bind(entity.entity_type.as_str())
            .bind(entity.id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("list revisions"))?;

        Ok((into_records(rows)?, total))
    }

    async fn find(&self, revision_id: DbId) -> Result<Option<RevisionRecord>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM revisions WHERE id = $1");
        let row = sqlx::query_as::<_, RevisionRow>(&query)
            .bind(revision_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("find revision"))?;

        row.map(RevisionRecord::try_from).transpose()
    }

    async fn prune_type(&self, entity_type: EntityType, retain: usize) -> Result<u64, CoreError> {
        let result = sqlx::query(
            "DELETE FROM revisions WHERE id IN ( \
                 SELECT id FROM ( \
                     SELECT id, ROW_NUMBER() OVER ( \
                         PARTITION BY entity_id ORDER BY sequence DESC \
                     ) AS rn \
                     FROM revisions WHERE entity_type = $1 \
                 ) ranked \
                 WHERE rn > $2)",
        )
        .bind(entity_type.as_str())
        .bind(retain.max(1) as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_error("sweep revisions"))?;

        Ok(result.rows_affected())
    }
}
