//! PostgreSQL pool and schema for the attribution store

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::Config;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Attribution store unreachable: {0}")]
    Connect(String),

    #[error("Attribution schema migration failed: {0}")]
    Migrate(String),

    #[error("Attribution store ping failed: {0}")]
    Ping(String),
}

/// Open the pool backing clicks, conversions and their counters
pub async fn create_pool(config: &Config) -> Result<PgPool, DbError> {
    tracing::info!(
        url = %config.database_url_masked(),
        max_connections = config.db_max_connections,
        "Opening attribution store pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .connect(&config.database_url)
        .await
        .map_err(|e| DbError::Connect(e.to_string()))?;

    tracing::info!("Attribution store pool ready");
    Ok(pool)
}

/// Apply `./migrations` (enums, entity tables, click and conversion indexes)
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::Migrate(e.to_string()))?;

    tracing::info!("Attribution schema up to date");
    Ok(())
}

/// `SELECT 1` round trip for `/health`
pub async fn check_health(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
        .map_err(|e| DbError::Ping(e.to_string()))
}
