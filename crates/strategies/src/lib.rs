//! # Argus Strategy Library
//!
//! This crate contains the analytics core of the system. It defines the
//! universal `Strategy` lifecycle trait and provides the five concrete
//! analytic modules:
//!
//! - `RegimeDetector` — Markov-chain regime inference over funding-rate deltas.
//! - `CascadeDetector` — clustering of temporally concentrated liquidation events.
//! - `StressSimulator` — scenario-based expected-loss and adequacy scoring.
//! - `FeeOptimizer` — multi-objective brute-force fee grid search.
//! - `MarginHealth` — margin-ratio buffer/trend/volatility scoring.
//!
//! ## Architectural Principles
//!
//! - **Pure logic over injected collaborators:** a strategy receives a
//!   `HistoricalDataStore` handle and its typed parameters; it knows nothing
//!   about scheduling, SQL, or the process entrypoint.
//! - **Arena-owned state:** each instance owns its derived maps and matrices
//!   exclusively. They are built in `initialize`, read and extended in
//!   `execute`, and emptied in `cleanup`. Observation rows are never retained
//!   across calls — only derived scalars and matrices — so memory stays
//!   bounded regardless of observation volume.
//! - **Closed strategy set:** the `factory` module enumerates every module in
//!   `StrategyId`; higher layers iterate `Box<dyn Strategy>` without runtime
//!   type inspection.

pub mod cascade;
pub mod error;
pub mod factory;
pub mod fee_optimizer;
pub mod margin_health;
pub mod regime;
pub mod stress;

// Re-export the key components to create a clean, public-facing API.
pub use cascade::CascadeDetector;
pub use error::StrategyError;
pub use factory::{create_all_strategies, create_strategy, StrategyId};
pub use fee_optimizer::FeeOptimizer;
pub use margin_health::MarginHealth;
pub use regime::RegimeDetector;
pub use stress::StressSimulator;

use async_trait::async_trait;
use core_types::{StrategyConfig, StrategyResult};
use datastore::ResultSink;
use tracing::warn;

/// The lifecycle contract every analytic module implements.
///
/// `initialize` builds baseline state from a module-specific lookback window
/// and fails hard when the window is too thin — that is a configuration
/// error, not a transient one. `execute` must be safe to call repeatedly on
/// a fixed cadence and reads only small recent windows plus the retained
/// baseline. `cleanup` releases every retained map and matrix.
///
/// The `Send + Sync` bounds let the runner dispatch all strategies of a tick
/// in parallel.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The immutable identity and parameters of this instance.
    fn config(&self) -> &StrategyConfig;

    /// Fetches the lookback window and builds baseline model state.
    ///
    /// Propagates `StrategyError::InsufficientData` when the window holds
    /// fewer observations than the module's minimum sample size.
    async fn initialize(&mut self) -> Result<(), StrategyError>;

    /// Produces one `StrategyResult` for the current tick.
    async fn execute(&mut self) -> Result<StrategyResult, StrategyError>;

    /// Empties all retained in-memory state.
    async fn cleanup(&mut self) -> Result<(), StrategyError>;
}

/// Persists a result to the sink, swallowing failures.
///
/// A logging failure must never abort strategy execution or the runner
/// tick, so the error is downgraded to a warning here and not propagated.
pub async fn log_result(sink: &dyn ResultSink, strategy: &str, result: &StrategyResult) {
    if let Err(e) = sink.log_result(strategy, result).await {
        warn!(strategy, error = %e, "failed to persist strategy result; continuing");
    }
}
