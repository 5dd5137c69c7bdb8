//! Repository for `users.preferences`.

use async_trait::async_trait;
use castle_core::error::CoreError;
use castle_core::preferences::UserPreferences;
use castle_core::recency::PreferenceStore;
use castle_core::types::DbId;
use serde_json::Value;

use crate::{storage_error, DbPool};

/// Reads and writes the preference blob of live users.
#[derive(Debug, Clone)]
pub struct PreferenceRepo {
    pool: DbPool,
}

impl PreferenceRepo {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PreferenceStore for PreferenceRepo {
    async fn load(&self, user_id: DbId) -> Result<UserPreferences, CoreError> {
        let row: Option<(Option<Value>,)> = sqlx::query_as(
            "SELECT preferences FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("load preferences"))?;

        let (blob,) = row.ok_or(CoreError::NotFound {
            entity: "user",
            id: user_id,
        })?;
        UserPreferences::from_value(blob.unwrap_or(Value::Null))
    }

    async fn save(&self, user_id: DbId, preferences: &UserPreferences) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE users SET preferences = $2, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(preferences.to_value())
        .execute(&self.pool)
        .await
        .map_err(storage_error("save preferences"))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                entity: "user",
                id: user_id,
            });
        }
        Ok(())
    }
}
