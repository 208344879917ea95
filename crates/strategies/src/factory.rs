use crate::{
    CascadeDetector, FeeOptimizer, MarginHealth, RegimeDetector, Strategy, StrategyError,
    StressSimulator,
};
use configuration::Config;
use datastore::HistoricalDataStore;
use std::sync::Arc;

/// Identifies which analytic module to create. This is the closed set the
/// runner iterates over; adding a module means adding a variant here and a
/// constructor arm below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyId {
    Regime,
    Cascade,
    Stress,
    FeeOptimizer,
    MarginHealth,
}

impl StrategyId {
    pub const ALL: [StrategyId; 5] = [
        StrategyId::Regime,
        StrategyId::Cascade,
        StrategyId::Stress,
        StrategyId::FeeOptimizer,
        StrategyId::MarginHealth,
    ];
}

/// Constructs a single strategy instance from the application config.
///
/// The strategy is GIVEN its parameters and a data store handle; it never
/// loads configuration or opens connections itself.
pub fn create_strategy(
    id: StrategyId,
    config: &Config,
    store: Arc<dyn HistoricalDataStore>,
) -> Result<Box<dyn Strategy>, StrategyError> {
    let strategy: Box<dyn Strategy> = match id {
        StrategyId::Regime => Box::new(RegimeDetector::new(
            config.strategies.regime.clone(),
            store,
        )),
        StrategyId::Cascade => Box::new(CascadeDetector::new(
            config.strategies.cascade.clone(),
            store,
        )),
        StrategyId::Stress => Box::new(StressSimulator::new(
            config.strategies.stress.clone(),
            store,
        )),
        StrategyId::FeeOptimizer => Box::new(FeeOptimizer::new(
            config.strategies.fee_optimizer.clone(),
            store,
        )),
        StrategyId::MarginHealth => Box::new(MarginHealth::new(
            config.strategies.margin_health.clone(),
            store,
        )),
    };
    Ok(strategy)
}

/// Constructs the full registered strategy set in a stable order.
pub fn create_all_strategies(
    config: &Config,
    store: Arc<dyn HistoricalDataStore>,
) -> Result<Vec<Box<dyn Strategy>>, StrategyError> {
    StrategyId::ALL
        .iter()
        .map(|id| create_strategy(*id, config, Arc::clone(&store)))
        .collect()
}
