//! PostgreSQL adapters for the Castle audit, search, and recency components.
//!
//! Every repository owns a clone of the pool and implements one of the
//! capability traits from `castle-core`, so the core components can be
//! wired against the database without knowing about sqlx.

use castle_core::error::CoreError;
use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Map a driver error onto the core taxonomy, logging it once here.
pub(crate) fn storage_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> CoreError {
    move |err| {
        tracing::error!(error = %err, context, "Database operation failed");
        CoreError::Storage(format!("{context}: {err}"))
    }
}
