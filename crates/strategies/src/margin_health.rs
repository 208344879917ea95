use crate::error::StrategyError;
use crate::Strategy;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use configuration::MarginHealthParams;
use core_types::{clamp01, series, StrategyConfig, StrategyResult};
use datastore::HistoricalDataStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use stats::{linear_regression, mean, std_dev};
use tracing::debug;

/// Margin-ratio baseline kept per entity between ticks.
#[derive(Debug, Clone, Copy, Default)]
struct MarginBaseline {
    mean_ratio: f64,
    sigma: f64,
}

/// Inputs to the health score for one entity at one tick.
#[derive(Debug, Clone, Copy)]
pub struct MarginSnapshot {
    pub current_ratio: f64,
    /// Linear trend of the recent window (ratio change per observation).
    pub trend_slope: f64,
    /// Recent ratio volatility relative to the baseline sigma.
    pub relative_volatility: f64,
}

/// Weighted margin health score in `[0, 1]`.
///
/// Blends the distance-to-maintenance buffer, the inverse of recent
/// volatility, and the trend direction: a falling margin ratio drags the
/// score down even while the buffer still looks comfortable.
pub fn health_score(
    snapshot: &MarginSnapshot,
    baseline_mean: f64,
    maintenance_ratio: f64,
) -> f64 {
    let headroom = baseline_mean - maintenance_ratio;
    let buffer = if headroom > 0.0 {
        clamp01((snapshot.current_ratio - maintenance_ratio) / headroom)
    } else if snapshot.current_ratio > maintenance_ratio {
        1.0
    } else {
        0.0
    };

    let volatility_penalty = clamp01(snapshot.relative_volatility / 2.0);

    // Map the slope onto [0,1] with 0.5 as "flat"; the headroom sets the
    // scale so a slope eating the whole buffer within ~10 observations
    // saturates the term.
    let slope_scale = if headroom > 0.0 { headroom / 10.0 } else { 1.0 };
    let trend = clamp01(0.5 + snapshot.trend_slope / (2.0 * slope_scale));

    clamp01(0.4 * buffer + 0.3 * (1.0 - volatility_penalty) + 0.3 * trend)
}

/// The margin health scorer.
///
/// Watches each entity's margin-ratio series and condenses buffer, trend
/// and volatility into one health score per entity plus a system mean,
/// flagging entities under the warning and critical thresholds.
pub struct MarginHealth {
    config: StrategyConfig,
    params: MarginHealthParams,
    store: Arc<dyn HistoricalDataStore>,
    baselines: BTreeMap<String, MarginBaseline>,
}

impl MarginHealth {
    pub fn new(params: MarginHealthParams, store: Arc<dyn HistoricalDataStore>) -> Self {
        let parameters = serde_json::to_value(&params).unwrap_or(json!({}));
        Self {
            config: StrategyConfig::new(
                "margin_health",
                "Margin-ratio buffer, trend and volatility scoring per monitored entity",
                parameters,
            ),
            params,
            store,
            baselines: BTreeMap::new(),
        }
    }
}

#[async_trait]
impl Strategy for MarginHealth {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    async fn initialize(&mut self) -> Result<(), StrategyError> {
        let end = Utc::now();
        let start = end - Duration::hours(self.params.lookback_hours);

        for entity in &self.params.entities {
            let margin_series = format!("margin:{entity}");
            let rows = self.store.fetch_range(&margin_series, start, end).await?;
            let ratios = series(&rows, "margin_ratio");
            if ratios.len() < self.params.min_samples {
                return Err(StrategyError::InsufficientData {
                    series: margin_series,
                    needed: self.params.min_samples,
                    got: ratios.len(),
                });
            }
            self.baselines.insert(
                entity.clone(),
                MarginBaseline {
                    mean_ratio: mean(&ratios),
                    sigma: std_dev(&ratios),
                },
            );
        }

        debug!(entities = self.baselines.len(), "margin baselines rebuilt");
        Ok(())
    }

    async fn execute(&mut self) -> Result<StrategyResult, StrategyError> {
        let end = Utc::now();
        let start = end - Duration::minutes(self.params.recent_window_minutes);

        let mut result = StrategyResult::now();
        let mut detail = serde_json::Map::new();
        let mut scores = Vec::new();

        for (entity, baseline) in &self.baselines {
            let margin_series = format!("margin:{entity}");
            let rows = self.store.fetch_range(&margin_series, start, end).await?;
            let ratios = series(&rows, "margin_ratio");
            let Some(&current_ratio) = ratios.last() else {
                // No fresh snapshot: prior signals stay unrefreshed.
                continue;
            };

            let index: Vec<f64> = (0..ratios.len()).map(|i| i as f64).collect();
            let fit = linear_regression(&index, &ratios);
            let relative_volatility = if baseline.sigma > 0.0 {
                std_dev(&ratios) / baseline.sigma
            } else {
                0.0
            };

            let snapshot = MarginSnapshot {
                current_ratio,
                trend_slope: fit.slope,
                relative_volatility,
            };
            let score = health_score(
                &snapshot,
                baseline.mean_ratio,
                self.params.maintenance_margin_ratio,
            );

            let status = if score < self.params.critical_threshold {
                "critical"
            } else if score < self.params.warning_threshold {
                "warning"
            } else {
                "healthy"
            };

            detail.insert(
                entity.clone(),
                json!({
                    "health": score,
                    "status": status,
                    "margin_ratio": current_ratio,
                    "trend_slope": fit.slope,
                }),
            );
            result.insert_metric(&format!("health:{entity}"), score);
            scores.push(score);
        }

        let system_health = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };

        result.insert_signal("entities", serde_json::Value::Object(detail));
        result.insert_metric("system_health", clamp01(system_health));
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

    #[test]
    fn score_stays_in_unit_range() {
        let snapshot = MarginSnapshot {
            current_ratio: 0.5,
            trend_slope: -10.0,
            relative_volatility: 100.0,
        };
        let score = health_score(&snapshot, 0.4, 0.05);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn comfortable_flat_margin_scores_high() {
        let snapshot = MarginSnapshot {
            current_ratio: 0.40,
            trend_slope: 0.0,
            relative_volatility: 1.0,
        };
        let score = health_score(&snapshot, 0.40, 0.05);
        assert!(score > 0.69, "score was {score}");
    }

    #[test]
    fn margin_at_maintenance_scores_low() {
        let healthy = MarginSnapshot {
            current_ratio: 0.40,
            trend_slope: 0.0,
            relative_volatility: 1.0,
        };
        let distressed = MarginSnapshot {
            current_ratio: 0.05,
            trend_slope: -0.01,
            relative_volatility: 2.5,
        };
        let good = health_score(&healthy, 0.40, 0.05);
        let bad = health_score(&distressed, 0.40, 0.05);
        assert!(bad < good);
        assert!(bad < 0.3, "distressed score was {bad}");
    }

    #[test]
    fn falling_trend_drags_the_score() {
        let flat = MarginSnapshot {
            current_ratio: 0.30,
            trend_slope: 0.0,
            relative_volatility: 1.0,
        };
        let falling = MarginSnapshot {
            current_ratio: 0.30,
            trend_slope: -0.05,
            relative_volatility: 1.0,
        };
        assert!(health_score(&falling, 0.40, 0.05) < health_score(&flat, 0.40, 0.05));
    }
}
