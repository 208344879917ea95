use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataStoreError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    Json(#[from] serde_json::Error),
}
