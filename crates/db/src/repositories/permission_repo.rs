//! Permission lookups backing search access control.

use async_trait::async_trait;
use castle_core::entity::EntityType;
use castle_core::error::CoreError;
use castle_core::search::AccessPolicy;
use castle_core::types::DbId;

use crate::{storage_error, DbPool};

/// Name of the permission that lets a user see an entity type.
pub fn view_permission(entity_type: EntityType) -> String {
    format!("view_{}", entity_type.as_str())
}

/// [`AccessPolicy`] over the `users_permissions` / `permissions` tables.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    pool: DbPool,
}

impl PermissionPolicy {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Give a user a named permission. Granting twice is a no-op.
    pub async fn grant(&self, user_id: DbId, permission: &str) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO users_permissions (user_id, permission_id) \
             SELECT $1, id FROM permissions WHERE name = $2 \
             ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(permission)
        .execute(&self.pool)
        .await
        .map_err(storage_error("grant permission"))?;
        Ok(())
    }
}

#[async_trait]
impl AccessPolicy for PermissionPolicy {
    async fn can_view(&self, user_id: DbId, entity_type: EntityType) -> Result<bool, CoreError> {
        let (allowed,): (bool,) = sqlx::query_as(
            "SELECT EXISTS( \
                 SELECT 1 FROM users_permissions up \
                 JOIN permissions p ON p.id = up.permission_id \
                 JOIN users u ON u.id = up.user_id \
                 WHERE up.user_id = $1 AND p.name = $2 AND u.deleted_at IS NULL)",
        )
        .bind(user_id)
        .bind(view_permission(entity_type))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error("check permission"))?;
        Ok(allowed)
    }
}
