use crate::error::DataStoreError;
use dotenvy::dotenv;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::env;
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// Reads `DATABASE_URL` from the environment (loading `.env` first) and
/// returns a pool that can be shared across the entire application.
pub async fn connect() -> Result<PgPool, DataStoreError> {
    // A missing .env file is fine; the variable may come from the real env.
    let _ = dotenv();

    let database_url = env::var("DATABASE_URL")
        .map_err(|_e| DataStoreError::ConnectionConfig("DATABASE_URL must be set.".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    Ok(pool)
}

/// Applies pending database migrations.
///
/// Run at startup so the observation and result tables exist before the
/// first tick is scheduled.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DataStoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
