//! # Argus Datastore Crate
//!
//! The storage boundary of the system. It defines the two collaborator
//! contracts the analytics core consumes — a read side for windowed
//! historical observations and an append-only sink for strategy results —
//! and provides the PostgreSQL implementation of both.
//!
//! ## Architectural Principles
//!
//! - **Contracts first:** the analytic modules and the runner depend only
//!   on the `HistoricalDataStore` and `ResultSink` traits, never on the
//!   concrete repository, so tests can substitute in-memory doubles.
//! - **Read/append only:** the core never updates rows in place. The read
//!   side returns observations in ascending time order (the windowed
//!   algorithms rely on it); the write side only inserts.
//! - **Asynchronous & Pooled:** all operations are async over a shared
//!   `PgPool`.

pub mod connection;
pub mod error;
pub mod repository;

pub use connection::{connect, run_migrations};
pub use error::DataStoreError;
pub use repository::DbRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Observation, StrategyResult};

/// Read-side collaborator: time-ranged historical observations.
#[async_trait]
pub trait HistoricalDataStore: Send + Sync {
    /// Fetches every observation of `series` with
    /// `start <= timestamp <= end`, in ascending time order.
    ///
    /// An empty result is valid and means "insufficient data" to the
    /// caller, not an error.
    async fn fetch_range(
        &self,
        series: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, DataStoreError>;
}

/// Write-side collaborator: the append-only result sink.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Appends one result record for the named strategy. Never updates.
    async fn log_result(
        &self,
        strategy: &str,
        result: &StrategyResult,
    ) -> Result<(), DataStoreError>;
}
