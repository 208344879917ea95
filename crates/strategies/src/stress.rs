use crate::error::StrategyError;
use crate::Strategy;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use configuration::StressParams;
use core_types::{clamp01, series, Observation, StrategyConfig, StrategyResult};
use datastore::HistoricalDataStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use stats::{annualized_volatility, log_returns, mean, sample_variance};
use tracing::debug;

/// Hourly sampling assumed for the volatility estimate.
const PERIODS_PER_YEAR: f64 = 8760.0;

/// A named stress scenario: shock multipliers applied to price, volume
/// (liquidity) and cross-asset correlation, plus how aggressively the
/// system deleverages while recovering.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub price_shock: f64,
    pub volume_shock: f64,
    pub correlation_shock: f64,
    pub deleveraging_factor: f64,
}

/// The fixed scenario set. Shocks are fractional multipliers; each is
/// further scaled per entity by that entity's current volatility and
/// liquidity state before the loss formulas run.
pub const SCENARIOS: [Scenario; 3] = [
    Scenario {
        name: "severe_crash",
        price_shock: -0.40,
        volume_shock: -0.50,
        correlation_shock: 0.90,
        deleveraging_factor: 1.5,
    },
    Scenario {
        name: "gradual_deleveraging",
        price_shock: -0.20,
        volume_shock: -0.25,
        correlation_shock: 0.60,
        deleveraging_factor: 2.0,
    },
    Scenario {
        name: "liquidity_crisis",
        price_shock: -0.15,
        volume_shock: -0.70,
        correlation_shock: 0.80,
        deleveraging_factor: 1.2,
    },
];

/// Current state of one monitored entity, assembled each tick from the
/// latest position snapshot plus the volatility/liquidity baseline.
#[derive(Debug, Clone, Copy)]
pub struct EntityState {
    pub total_exposure: f64,
    pub leverage_utilization: f64,
    pub concentration_risk: f64,
    pub position_count: f64,
    /// The risk buffer absorbing losses (insurance fund balance).
    pub balance: f64,
    /// Annualized volatility from the lookback window.
    pub volatility: f64,
    /// Current volume relative to the lookback average; below 1 means
    /// thinner liquidity than usual.
    pub liquidity_ratio: f64,
}

/// Outcome of one scenario against one entity.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioOutcome {
    pub expected_loss: f64,
    pub drawdown: f64,
    /// Hours until the buffer recovers, against the configured horizon.
    pub recovery_time: f64,
    pub survivability: f64,
    pub loss_ratio: f64,
    pub system_impact: f64,
}

/// Runs the expected-loss formulas for one scenario/entity pair.
///
/// Each impact term is a shock factor times a system-load measurement:
/// leverage utilization, concentration risk, and sqrt(position count).
pub fn simulate_scenario(scenario: &Scenario, state: &EntityState, horizon: f64) -> ScenarioOutcome {
    // Scale the raw shocks by the entity's own state: volatile entities
    // see amplified price shocks, illiquid ones amplified volume shocks.
    let price_shock = scenario.price_shock * (1.0 + state.volatility);
    let volume_shock = scenario.volume_shock * (1.0 + (1.0 - state.liquidity_ratio).max(0.0));
    let correlation_shock = scenario.correlation_shock;

    let leverage_impact = price_shock.abs() * state.leverage_utilization;
    let liquidity_impact = volume_shock.abs() * state.concentration_risk;
    let correlation_impact = correlation_shock * state.position_count.max(0.0).sqrt();

    let expected_loss = state.total_exposure
        * (0.4 * leverage_impact + 0.3 * liquidity_impact + 0.3 * correlation_impact);

    let drawdown = if state.balance > 0.0 {
        (expected_loss / state.balance * (1.0 + volume_shock.abs()) * (1.0 + price_shock.abs()))
            .min(1.0)
    } else {
        // No buffer at all: any loss is a full drawdown.
        1.0
    };

    let price_shock_factor = 1.0 + price_shock.abs();
    let recovery_time = drawdown * horizon * price_shock_factor * scenario.deleveraging_factor;

    let mean_shock =
        (price_shock.abs() + volume_shock.abs() + correlation_shock.abs()) / 3.0;
    let survivability = clamp01(
        0.4 * (1.0 - drawdown)
            + 0.3 * (1.0 - recovery_time / (2.0 * horizon))
            + 0.3 * (1.0 - clamp01(mean_shock)),
    );

    let loss_ratio = if state.balance > 0.0 {
        clamp01(expected_loss / state.balance)
    } else {
        1.0
    };
    let system_impact = clamp01(drawdown * state.concentration_risk);

    ScenarioOutcome {
        expected_loss,
        drawdown: clamp01(drawdown),
        recovery_time,
        survivability,
        loss_ratio,
        system_impact,
    }
}

/// Composite adequacy of the buffer across all scenarios for one entity.
pub fn adequacy_score(outcomes: &[ScenarioOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let n = outcomes.len() as f64;
    let avg_survivability = outcomes.iter().map(|o| o.survivability).sum::<f64>() / n;
    let avg_loss_ratio = outcomes.iter().map(|o| o.loss_ratio).sum::<f64>() / n;
    let avg_system_impact = outcomes.iter().map(|o| o.system_impact).sum::<f64>() / n;
    clamp01(0.5 * avg_survivability + 0.3 * (1.0 - avg_loss_ratio) + 0.2 * (1.0 - avg_system_impact))
}

/// Baseline state kept per entity between ticks.
#[derive(Debug, Clone, Copy, Default)]
struct EntityBaseline {
    volatility: f64,
    avg_volume: f64,
}

/// The scenario-based stress simulator.
///
/// Not a backtest: it applies a fixed scenario grid to the live position
/// state and scores whether the insurance buffer absorbs the simulated
/// losses.
pub struct StressSimulator {
    config: StrategyConfig,
    params: StressParams,
    store: Arc<dyn HistoricalDataStore>,
    baselines: BTreeMap<String, EntityBaseline>,
}

impl StressSimulator {
    pub fn new(params: StressParams, store: Arc<dyn HistoricalDataStore>) -> Self {
        let parameters = serde_json::to_value(&params).unwrap_or(json!({}));
        Self {
            config: StrategyConfig::new(
                "stress_simulator",
                "Scenario-based expected-loss estimation and insurance adequacy scoring",
                parameters,
            ),
            params,
            store,
            baselines: BTreeMap::new(),
        }
    }

    /// Assembles the current entity state from the latest position snapshot
    /// and the stored baseline. Returns None when no snapshot exists yet.
    fn entity_state(&self, entity: &str, snapshot: Option<&Observation>) -> Option<EntityState> {
        let row = snapshot?;
        let baseline = self.baselines.get(entity).copied().unwrap_or_default();
        let volume = row.field("volume").unwrap_or(baseline.avg_volume);
        let liquidity_ratio = if baseline.avg_volume > 0.0 {
            volume / baseline.avg_volume
        } else {
            1.0
        };
        Some(EntityState {
            total_exposure: row.field("total_exposure").unwrap_or(0.0),
            leverage_utilization: row.field("leverage_utilization").unwrap_or(0.0),
            concentration_risk: row.field("concentration_risk").unwrap_or(0.0),
            position_count: row.field("position_count").unwrap_or(0.0),
            balance: row.field("insurance_balance").unwrap_or(0.0),
            volatility: baseline.volatility,
            liquidity_ratio,
        })
    }
}

#[async_trait]
impl Strategy for StressSimulator {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    async fn initialize(&mut self) -> Result<(), StrategyError> {
        let end = Utc::now();
        let start = end - Duration::hours(self.params.lookback_hours);

        for entity in &self.params.entities {
            let price_series = format!("prices:{entity}");
            let rows = self.store.fetch_range(&price_series, start, end).await?;
            let prices = series(&rows, "price");
            if prices.len() < self.params.min_samples {
                return Err(StrategyError::InsufficientData {
                    series: price_series,
                    needed: self.params.min_samples,
                    got: prices.len(),
                });
            }

            let returns = log_returns(&prices);
            let volatility = annualized_volatility(sample_variance(&returns), PERIODS_PER_YEAR);
            let volumes = series(&rows, "volume");
            self.baselines.insert(
                entity.clone(),
                EntityBaseline {
                    volatility,
                    avg_volume: mean(&volumes),
                },
            );
        }

        debug!(entities = self.baselines.len(), "stress baselines rebuilt");
        Ok(())
    }

    async fn execute(&mut self) -> Result<StrategyResult, StrategyError> {
        let end = Utc::now();
        let start = end - Duration::hours(1);

        let mut result = StrategyResult::now();
        let mut entity_scores: Vec<(String, f64, &'static str)> = Vec::new();
        let mut detail = serde_json::Map::new();

        for entity in &self.params.entities {
            let position_series = format!("positions:{entity}");
            let rows = self.store.fetch_range(&position_series, start, end).await?;
            let Some(state) = self.entity_state(entity, rows.last()) else {
                // No snapshot this tick: the entity's prior signals simply
                // are not refreshed.
                continue;
            };

            let outcomes: Vec<ScenarioOutcome> = SCENARIOS
                .iter()
                .map(|s| simulate_scenario(s, &state, self.params.horizon_hours))
                .collect();
            let adequacy = adequacy_score(&outcomes);

            let worst = SCENARIOS
                .iter()
                .zip(outcomes.iter())
                .min_by(|a, b| a.1.survivability.total_cmp(&b.1.survivability))
                .map(|(s, _)| s.name)
                .unwrap_or("none");

            let scenario_detail: Vec<serde_json::Value> = SCENARIOS
                .iter()
                .zip(outcomes.iter())
                .map(|(s, o)| {
                    json!({
                        "scenario": s.name,
                        "expected_loss": o.expected_loss,
                        "drawdown": o.drawdown,
                        "recovery_time_hours": o.recovery_time,
                        "survivability": o.survivability,
                    })
                })
                .collect();
            detail.insert(
                entity.clone(),
                json!({
                    "adequacy": adequacy,
                    "worst_scenario": worst,
                    "scenarios": scenario_detail,
                }),
            );

            result.insert_metric(&format!("adequacy:{entity}"), adequacy);
            entity_scores.push((entity.clone(), adequacy, worst));
        }

        // Ranked recommendations: weakest entities first, referencing the
        // scenario that breaks them.
        entity_scores.sort_by(|a, b| a.1.total_cmp(&b.1));
        let recommendations: Vec<serde_json::Value> = entity_scores
            .iter()
            .filter(|(_, adequacy, _)| *adequacy < 0.6)
            .map(|(entity, adequacy, worst)| {
                let severity = if *adequacy < 0.3 { "critical" } else { "warning" };
                json!({
                    "entity": entity,
                    "severity": severity,
                    "adequacy": adequacy,
                    "message": format!(
                        "{entity}: insurance buffer adequacy {adequacy:.2} under '{worst}'; \
                         consider raising the buffer or tightening leverage caps"
                    ),
                })
            })
            .collect();

        let system_adequacy = if entity_scores.is_empty() {
            0.0
        } else {
            entity_scores.iter().map(|(_, a, _)| *a).sum::<f64>() / entity_scores.len() as f64
        };

        result.insert_signal("entities", serde_json::Value::Object(detail));
        result.insert_signal("recommendations", json!(recommendations));
        result.insert_metric("system_adequacy", clamp01(system_adequacy));
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        self.baselines = BTreeMap::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_state() -> EntityState {
        EntityState {
            total_exposure: 1_000_000.0,
            leverage_utilization: 0.3,
            concentration_risk: 0.2,
            position_count: 100.0,
            balance: 50_000_000.0,
            volatility: 0.4,
            liquidity_ratio: 1.0,
        }
    }

    #[test]
    fn outcomes_stay_in_unit_ranges() {
        for scenario in &SCENARIOS {
            let outcome = simulate_scenario(scenario, &healthy_state(), 24.0);
            assert!((0.0..=1.0).contains(&outcome.drawdown));
            assert!((0.0..=1.0).contains(&outcome.survivability));
            assert!((0.0..=1.0).contains(&outcome.loss_ratio));
            assert!((0.0..=1.0).contains(&outcome.system_impact));
            assert!(outcome.expected_loss >= 0.0);
        }
    }

    #[test]
    fn zero_balance_means_full_drawdown() {
        let mut state = healthy_state();
        state.balance = 0.0;
        let outcome = simulate_scenario(&SCENARIOS[0], &state, 24.0);
        assert_eq!(outcome.drawdown, 1.0);
        assert_eq!(outcome.loss_ratio, 1.0);
    }

    #[test]
    fn bigger_buffer_survives_better() {
        let mut thin = healthy_state();
        thin.balance = 500_000.0;
        let weak = simulate_scenario(&SCENARIOS[0], &thin, 24.0);
        let strong = simulate_scenario(&SCENARIOS[0], &healthy_state(), 24.0);
        assert!(strong.survivability >= weak.survivability);
        assert!(strong.drawdown <= weak.drawdown);
    }

    #[test]
    fn adequacy_is_clamped_and_zero_for_empty() {
        assert_eq!(adequacy_score(&[]), 0.0);
        let outcomes: Vec<ScenarioOutcome> = SCENARIOS
            .iter()
            .map(|s| simulate_scenario(s, &healthy_state(), 24.0))
            .collect();
        let score = adequacy_score(&outcomes);
        assert!((0.0..=1.0).contains(&score));
    }
}
