use anyhow::Context;
use castle_core::config::CastleConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "castle_worker=debug,castle_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = CastleConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        history_limit = config.revisions.history_limit,
        "Loaded revision configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = castle_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    castle_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    castle_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Sweep ---
    let store = castle_worker::revision_store(pool, &config);
    let report = castle_worker::run_retention_sweep(&store)
        .await
        .context("Revision retention sweep failed")?;
    tracing::info!(deleted = report.total(), "Retention sweep finished");

    Ok(())
}
