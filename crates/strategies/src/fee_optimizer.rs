use crate::error::StrategyError;
use crate::Strategy;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use configuration::FeeOptimizerParams;
use core_types::{clamp01, series, StrategyConfig, StrategyResult};
use datastore::HistoricalDataStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use stats::{linear_regression, mean, pearson, std_dev, Regression};
use tracing::debug;

// Revenue attribution constants: how much of the traded volume the
// funding and liquidation legs touch per period.
const FUNDING_TURNOVER: f64 = 0.3;
const LIQUIDATION_RATE: f64 = 0.05;

/// Objective weights for the grid score.
const W_REVENUE: f64 = 0.4;
const W_VOLUME: f64 = 0.2;
const W_QUALITY: f64 = 0.2;
const W_IMPACT: f64 = 0.2;

/// One point of the 3-D fee grid with its projected objectives.
#[derive(Debug, Clone, Copy)]
pub struct GridPoint {
    pub trading_fee: f64,
    pub funding_fee: f64,
    pub liquidation_fee: f64,
    pub projected_volume: f64,
    pub projected_revenue: f64,
    /// Per-unit fee load users pay at this point (sum of the three fees).
    pub user_cost: f64,
    pub market_quality: f64,
}

/// The swept grid with per-point weighted scores.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub points: Vec<GridPoint>,
    pub scores: Vec<f64>,
    pub optimal_index: usize,
    /// Fraction of grid points whose revenue is within 10% of the optimum.
    pub robustness: f64,
}

/// Elasticity model and baseline observed for one entity, fitted once in
/// `initialize` and reused across every grid sweep. Treating the local
/// elasticity as constant over a sweep is intentional.
#[derive(Debug, Clone, Copy)]
struct EntityModel {
    elasticity: Regression,
    base_volume: f64,
    volume_stability: f64,
    current_trading_fee: f64,
    current_revenue: f64,
    base_quality: f64,
}

/// Projects the objectives for every point of the fee grid and scores them.
///
/// Volume comes from the elasticity line evaluated at the candidate trading
/// fee, floored at zero; revenue sums the three fee legs; user cost is the
/// per-unit fee load; quality scales the baseline quality by the volume
/// ratio (deeper books quote tighter).
pub fn sweep_grid(
    trading: &[f64],
    funding: &[f64],
    liquidation: &[f64],
    elasticity: &Regression,
    base_volume: f64,
    base_quality: f64,
) -> Option<SweepOutcome> {
    let mut points = Vec::with_capacity(trading.len() * funding.len() * liquidation.len());
    for &tf in trading {
        for &ff in funding {
            for &lf in liquidation {
                let projected_volume = (elasticity.intercept + elasticity.slope * tf).max(0.0);
                let projected_revenue = projected_volume
                    * (tf + ff * FUNDING_TURNOVER + lf * LIQUIDATION_RATE);
                let user_cost = tf + ff + lf;
                let volume_ratio = if base_volume > 0.0 {
                    projected_volume / base_volume
                } else {
                    0.0
                };
                let market_quality = clamp01(base_quality * volume_ratio);
                points.push(GridPoint {
                    trading_fee: tf,
                    funding_fee: ff,
                    liquidation_fee: lf,
                    projected_volume,
                    projected_revenue,
                    user_cost,
                    market_quality,
                });
            }
        }
    }
    if points.is_empty() {
        return None;
    }

    let max_revenue = points.iter().map(|p| p.projected_revenue).fold(0.0, f64::max);
    let max_volume = points.iter().map(|p| p.projected_volume).fold(0.0, f64::max);
    let max_quality = points.iter().map(|p| p.market_quality).fold(0.0, f64::max);
    let max_cost = points.iter().map(|p| p.user_cost).fold(0.0, f64::max);

    let norm = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };
    let scores: Vec<f64> = points
        .iter()
        .map(|p| {
            W_REVENUE * norm(p.projected_revenue, max_revenue)
                + W_VOLUME * norm(p.projected_volume, max_volume)
                + W_QUALITY * norm(p.market_quality, max_quality)
                + W_IMPACT * (1.0 - norm(p.user_cost, max_cost))
        })
        .collect();

    let optimal_index = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)?;

    let optimal_revenue = points[optimal_index].projected_revenue;
    let robustness = if optimal_revenue > 0.0 {
        points
            .iter()
            .filter(|p| (p.projected_revenue - optimal_revenue).abs() <= optimal_revenue * 0.10)
            .count() as f64
            / points.len() as f64
    } else {
        1.0
    };

    Some(SweepOutcome {
        points,
        scores,
        optimal_index,
        robustness,
    })
}

/// Tradeoffs between objectives: every pair whose Pearson correlation
/// across the swept grid is negative, i.e. improving one costs the other.
pub fn objective_tradeoffs(points: &[GridPoint]) -> Vec<(String, String, f64)> {
    let revenue: Vec<f64> = points.iter().map(|p| p.projected_revenue).collect();
    let volume: Vec<f64> = points.iter().map(|p| p.projected_volume).collect();
    let quality: Vec<f64> = points.iter().map(|p| p.market_quality).collect();
    let cost: Vec<f64> = points.iter().map(|p| p.user_cost).collect();

    let pairs: [(&str, &[f64], &str, &[f64]); 4] = [
        ("revenue", &revenue, "volume", &volume),
        ("revenue", &revenue, "market_quality", &quality),
        ("volume", &volume, "user_cost", &cost),
        ("market_quality", &quality, "user_cost", &cost),
    ];

    pairs
        .iter()
        .filter_map(|(a_name, a, b_name, b)| {
            let corr = pearson(a, b);
            (corr < 0.0).then(|| (a_name.to_string(), b_name.to_string(), corr))
        })
        .collect()
}

/// The multi-objective fee grid optimizer.
///
/// Per entity, enumerates the (trading, funding, liquidation) fee grid,
/// projects volume through a linear elasticity model fitted once at
/// initialize, and picks the point maximizing the weighted objective score.
pub struct FeeOptimizer {
    config: StrategyConfig,
    params: FeeOptimizerParams,
    store: Arc<dyn HistoricalDataStore>,
    models: BTreeMap<String, EntityModel>,
}

impl FeeOptimizer {
    pub fn new(params: FeeOptimizerParams, store: Arc<dyn HistoricalDataStore>) -> Self {
        let parameters = serde_json::to_value(&params).unwrap_or(json!({}));
        Self {
            config: StrategyConfig::new(
                "fee_optimizer",
                "Multi-objective brute-force search over the fee grid with a volume elasticity model",
                parameters,
            ),
            params,
            store,
            models: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl Strategy for FeeOptimizer {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    async fn initialize(&mut self) -> Result<(), StrategyError> {
        let end = Utc::now();
        let start = end - Duration::days(self.params.lookback_days);

        for entity in &self.params.entities {
            let fee_series = format!("fee_metrics:{entity}");
            let rows = self.store.fetch_range(&fee_series, start, end).await?;
            let fees = series(&rows, "trading_fee");
            let volumes = series(&rows, "volume");
            if fees.len() < self.params.min_samples || volumes.len() < self.params.min_samples {
                return Err(StrategyError::InsufficientData {
                    series: fee_series,
                    needed: self.params.min_samples,
                    got: fees.len().min(volumes.len()),
                });
            }

            let elasticity = linear_regression(&fees, &volumes);
            let base_volume = mean(&volumes);
            let volume_stability = if base_volume > 0.0 {
                clamp01(1.0 - std_dev(&volumes) / base_volume)
            } else {
                0.0
            };
            let current_trading_fee = *fees.last().unwrap_or(&0.0);
            let qualities = series(&rows, "market_quality");
            let base_quality = if qualities.is_empty() {
                1.0
            } else {
                clamp01(mean(&qualities))
            };

            self.models.insert(
                entity.clone(),
                EntityModel {
                    elasticity,
                    base_volume,
                    volume_stability,
                    current_trading_fee,
                    current_revenue: base_volume * current_trading_fee,
                    base_quality,
                },
            );
        }

        debug!(entities = self.models.len(), "elasticity models fitted");
        Ok(())
    }

    async fn execute(&mut self) -> Result<StrategyResult, StrategyError> {
        let trading = self.params.trading_fee.values();
        let funding = self.params.funding_fee.values();
        let liquidation = self.params.liquidation_fee.values();

        let mut result = StrategyResult::now();
        let mut detail = serde_json::Map::new();

        for (entity, model) in &self.models {
            let Some(outcome) = sweep_grid(
                &trading,
                &funding,
                &liquidation,
                &model.elasticity,
                model.base_volume,
                model.base_quality,
            ) else {
                result.insert_signal("status", json!("empty_grid"));
                continue;
            };

            let optimal = outcome.points[outcome.optimal_index];
            let single_point = outcome.points.len() == 1;

            let confidence = if single_point {
                // Nothing to be uncertain between.
                1.0
            } else {
                let revenue_delta = if model.current_revenue > 0.0 {
                    clamp01(
                        (optimal.projected_revenue - model.current_revenue)
                            / model.current_revenue
                            + 0.5,
                    )
                } else {
                    0.5
                };
                let quality_delta = clamp01(
                    optimal.market_quality - model.base_quality + 0.5,
                );
                clamp01(
                    0.25 * revenue_delta
                        + 0.25 * model.volume_stability
                        + 0.25 * quality_delta
                        + 0.25 * outcome.robustness,
                )
            };
            let robustness = if single_point { 1.0 } else { outcome.robustness };

            let tradeoffs: Vec<serde_json::Value> = objective_tradeoffs(&outcome.points)
                .into_iter()
                .map(|(a, b, corr)| json!({ "between": [a, b], "correlation": corr }))
                .collect();

            detail.insert(
                entity.clone(),
                json!({
                    "optimal": {
                        "trading_fee": optimal.trading_fee,
                        "funding_fee": optimal.funding_fee,
                        "liquidation_fee": optimal.liquidation_fee,
                        "projected_volume": optimal.projected_volume,
                        "projected_revenue": optimal.projected_revenue,
                    },
                    "current_trading_fee": model.current_trading_fee,
                    "grid_points": outcome.points.len(),
                    "tradeoffs": tradeoffs,
                }),
            );
            result.insert_metric(&format!("confidence:{entity}"), confidence);
            result.insert_metric(&format!("robustness:{entity}"), robustness);
            result.insert_metric(
                &format!("projected_revenue:{entity}"),
                optimal.projected_revenue,
            );
        }

        result.insert_signal("entities", serde_json::Value::Object(detail));
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        self.models = BTreeMap::new();
        Ok(())
    }
}
