use serde::{Deserialize, Serialize};

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub runner: RunnerSettings,
    pub strategies: StrategiesSettings,
}

/// Scheduling parameters for the strategy runner.
///
/// These are operational values, not part of any algorithmic contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Target spacing between ticks, in seconds. The loop self-paces:
    /// the sleep is this interval minus the elapsed execution time.
    pub interval_secs: u64,
    /// Total attempts allowed per initialize/execute call (1 = no retry).
    pub retry_count: u32,
    /// Fixed delay between retry attempts, in seconds.
    pub retry_delay_secs: u64,
}

/// Contains the parameter sets for all available strategies.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategiesSettings {
    pub regime: RegimeParams,
    pub cascade: CascadeParams,
    pub stress: StressParams,
    pub fee_optimizer: FeeOptimizerParams,
    pub margin_health: MarginHealthParams,
}

/// Parameters for the Markov regime detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeParams {
    /// The observation series the regime is inferred from (e.g. "funding_rates:BTC-PERP").
    pub series: String,
    /// The numeric field within that series (e.g. "rate").
    pub field: String,
    /// Baseline lookback used to build the transition matrix, in hours.
    pub lookback_hours: i64,
    /// Recent window used to classify the current state, in minutes.
    pub recent_window_minutes: i64,
    /// Minimum observation count for the lookback; below this,
    /// initialization fails as a configuration error.
    pub min_samples: usize,
}

/// Parameters for the liquidation cascade detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeParams {
    /// Series of extreme events (e.g. "liquidations:BTC-PERP").
    pub event_series: String,
    /// Price series used for local impact lookups.
    pub price_series: String,
    /// Series of current at-risk positions with liquidation prices.
    pub position_series: String,
    /// Historical lookback for pattern mining, in days.
    pub lookback_days: i64,
    /// Minimum price observation count for the lookback window.
    pub min_samples: usize,
    /// Minimum events for a pattern to qualify as a cascade.
    pub min_cascade_size: usize,
    /// Minimum local price impact (fractional) for an event to qualify.
    pub price_impact_threshold: f64,
    /// Maximum gap between consecutive events in one pattern, in minutes.
    pub cascade_window_minutes: i64,
    /// Liquidation prices within this fraction of each other cluster together.
    pub cluster_proximity_pct: f64,
    /// Window for the runtime at-risk position snapshot, in minutes.
    pub recent_window_minutes: i64,
}

/// Parameters for the scenario-based stress simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressParams {
    /// The entities (markets) the simulator stresses.
    pub entities: Vec<String>,
    /// Scenario horizon, in hours. Recovery times are reported against it.
    pub horizon_hours: f64,
    /// Lookback used to estimate current volatility/liquidity state, in hours.
    pub lookback_hours: i64,
    /// Minimum observation count for the lookback.
    pub min_samples: usize,
}

/// One axis of the fee grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl GridRange {
    /// Enumerates the axis values: min, min+step, ..., up to max inclusive.
    pub fn values(&self) -> Vec<f64> {
        let mut out = Vec::new();
        if self.step <= 0.0 || self.max < self.min {
            return out;
        }
        let mut current = self.min;
        // Half-step tolerance so max survives float accumulation.
        while current <= self.max + self.step * 0.5 {
            out.push(current);
            current += self.step;
        }
        out
    }
}

/// Parameters for the fee grid optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeOptimizerParams {
    /// The entities (markets) whose fee schedules are swept.
    pub entities: Vec<String>,
    /// Lookback used to fit the volume elasticity model, in days.
    pub lookback_days: i64,
    /// Minimum observation count for the elasticity fit.
    pub min_samples: usize,
    pub trading_fee: GridRange,
    pub funding_fee: GridRange,
    pub liquidation_fee: GridRange,
}

/// Parameters for the margin health scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginHealthParams {
    /// The entities (accounts or markets) whose margin ratios are scored.
    pub entities: Vec<String>,
    /// Baseline lookback, in hours.
    pub lookback_hours: i64,
    /// Recent window scored each tick, in minutes.
    pub recent_window_minutes: i64,
    /// Minimum observation count for the baseline.
    pub min_samples: usize,
    /// Margin ratio at which positions are liquidated.
    pub maintenance_margin_ratio: f64,
    /// Health below this is flagged critical.
    pub critical_threshold: f64,
    /// Health below this (but above critical) is flagged warning.
    pub warning_threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_range_includes_both_endpoints() {
        let range = GridRange {
            min: 0.0001,
            max: 0.0005,
            step: 0.0001,
        };
        let values = range.values();
        assert_eq!(values.len(), 5);
        assert!((values[0] - 0.0001).abs() < 1e-12);
        assert!((values[4] - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn grid_range_single_point() {
        let range = GridRange {
            min: 0.001,
            max: 0.001,
            step: 0.001,
        };
        assert_eq!(range.values().len(), 1);
    }

    #[test]
    fn grid_range_rejects_bad_step() {
        let range = GridRange {
            min: 0.0,
            max: 1.0,
            step: 0.0,
        };
        assert!(range.values().is_empty());
    }
}
