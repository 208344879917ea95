use crate::{DataStoreError, HistoricalDataStore, ResultSink};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Observation, StrategyResult};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL and implements both collaborator
/// contracts over a shared connection pool.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoricalDataStore for DbRepository {
    async fn fetch_range(
        &self,
        series: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, DataStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT observed_at, fields
            FROM market_observations
            WHERE series = $1 AND observed_at >= $2 AND observed_at <= $3
            ORDER BY observed_at ASC
            "#,
        )
        .bind(series)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut observations = Vec::with_capacity(rows.len());
        for row in rows {
            let timestamp: DateTime<Utc> = row.get("observed_at");
            let fields: JsonValue = row.get("fields");
            let fields = serde_json::from_value(fields)?;
            observations.push(Observation::new(timestamp, fields));
        }
        Ok(observations)
    }
}

#[async_trait]
impl ResultSink for DbRepository {
    async fn log_result(
        &self,
        strategy: &str,
        result: &StrategyResult,
    ) -> Result<(), DataStoreError> {
        let signals = JsonValue::Object(result.signals.clone());
        let metrics = serde_json::to_value(&result.metrics)?;

        sqlx::query(
            r#"
            INSERT INTO strategy_results (result_id, strategy, produced_at, signals, metrics)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(strategy)
        .bind(result.timestamp)
        .bind(signals)
        .bind(metrics)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
