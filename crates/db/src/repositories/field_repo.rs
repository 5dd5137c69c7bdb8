//! Column-level reads and writes used by revision restore.
//!
//! Table names come from [`EntityType::table_name`]; field names come from
//! revision records, so they are checked against a strict identifier
//! pattern before being spliced into SQL.

use std::sync::LazyLock;

use async_trait::async_trait;
use castle_core::entity::{EntityRef, EntityType};
use castle_core::error::CoreError;
use castle_core::revision::{FieldSource, PendingRestore, RestoreOutcome};
use castle_core::types::DbId;
use castle_core::validation::{FieldRules, RestoreValidator};
use regex::Regex;

use crate::repositories::RevisionRepo;
use crate::{storage_error, DbPool};

/// Regex matching a plain lower-case SQL identifier.
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("valid regex"));

/// Reject anything that is not a plain lower-case SQL identifier.
pub fn checked_column(field: &str) -> Result<&str, CoreError> {
    if IDENTIFIER_RE.is_match(field) {
        Ok(field)
    } else {
        Err(CoreError::Validation(format!("Invalid field name: '{field}'")))
    }
}

// ---------------------------------------------------------------------------
// ColumnFieldSource
// ---------------------------------------------------------------------------

/// Reads a field as text from the entity's own table, and writes restored
/// values back to it.
#[derive(Debug, Clone)]
pub struct ColumnFieldSource {
    pool: DbPool,
}

impl ColumnFieldSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Write a prepared restore and its audit record in one transaction.
    ///
    /// Fails with `NotFound` and writes nothing if the entity is missing or
    /// soft-deleted by the time the update runs.
    pub async fn apply_restore(
        &self,
        restore: PendingRestore,
    ) -> Result<RestoreOutcome, CoreError> {
        let entity = restore.audit.entity;
        let column = checked_column(&restore.field)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(storage_error("begin restore"))?;

        let query = format!(
            "UPDATE {} SET {column} = $1, updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL",
            entity.entity_type.table_name()
        );
        let updated = sqlx::query(&query)
            .bind(&restore.value)
            .bind(entity.id)
            .execute(&mut *tx)
            .await
            .map_err(storage_error("apply restored value"))?
            .rows_affected();
        if updated == 0 {
            return Err(CoreError::NotFound {
                entity: entity.entity_type.as_str(),
                id: entity.id,
            });
        }

        let mut stored = RevisionRepo::append_in(
            &mut *tx,
            entity,
            &restore.audit.records,
            restore.audit.retain,
        )
        .await?;
        let audit = stored.pop().ok_or_else(|| {
            CoreError::Storage(format!(
                "no audit record returned when restoring revision {}",
                restore.revision_id
            ))
        })?;

        tx.commit()
            .await
            .map_err(storage_error("commit restore"))?;

        tracing::info!(
            %entity,
            revision_id = restore.revision_id,
            field = %restore.field,
            "Applied restored field value"
        );
        Ok(RestoreOutcome {
            field: restore.field,
            value: restore.value,
            audit,
        })
    }
}

#[async_trait]
impl FieldSource for ColumnFieldSource {
    async fn current_value(
        &self,
        entity: EntityRef,
        field: &str,
    ) -> Result<Option<String>, CoreError> {
        let column = checked_column(field)?;
        let query = format!(
            "SELECT {column}::text FROM {} WHERE id = $1 AND deleted_at IS NULL",
            entity.entity_type.table_name()
        );

        let row: Option<(Option<String>,)> = sqlx::query_as(&query)
            .bind(entity.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error("read current field value"))?;

        row.map(|(value,)| value).ok_or(CoreError::NotFound {
            entity: entity.entity_type.as_str(),
            id: entity.id,
        })
    }
}

// ---------------------------------------------------------------------------
// SlugUniquenessValidator
// ---------------------------------------------------------------------------

/// [`FieldRules`] plus a check that a restored slug is not taken by another
/// live row of the same type.
#[derive(Debug, Clone)]
pub struct SlugUniquenessValidator {
    pool: DbPool,
    rules: FieldRules,
}

impl SlugUniquenessValidator {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            rules: FieldRules,
        }
    }

    /// Whether another live row of `entity_type` already uses `slug`.
    pub async fn slug_taken(
        &self,
        entity_type: EntityType,
        slug: &str,
        except_id: DbId,
    ) -> Result<bool, CoreError> {
        let query = format!(
            "SELECT EXISTS( \
                 SELECT 1 FROM {} WHERE slug = $1 AND id <> $2 AND deleted_at IS NULL)",
            entity_type.table_name()
        );
        let (taken,): (bool,) = sqlx::query_as(&query)
            .bind(slug)
            .bind(except_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error("check slug uniqueness"))?;
        Ok(taken)
    }
}

#[async_trait]
impl RestoreValidator for SlugUniquenessValidator {
    async fn validate(
        &self,
        entity: EntityRef,
        field: &str,
        value: Option<&str>,
    ) -> Result<(), CoreError> {
        self.rules.check(field, value)?;

        if let ("slug", Some(slug)) = (field, value) {
            if self.slug_taken(entity.entity_type, slug, entity.id).await? {
                return Err(CoreError::Validation(format!(
                    "The slug '{slug}' has already been taken"
                )));
            }
        }
        Ok(())
    }
}
