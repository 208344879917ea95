use crate::error::StrategyError;
use crate::Strategy;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use configuration::RegimeParams;
use core_types::{clamp01, series, StrategyConfig, StrategyResult};
use datastore::HistoricalDataStore;
use serde_json::json;
use std::sync::Arc;
use stats::{discretize_sigma, first_differences, mean, std_dev};
use tracing::debug;

/// Number of regime states: Low / Medium / High rate-of-change.
pub const NUM_STATES: usize = 3;

/// Human-readable labels for the regime states, indexed by state number.
pub const STATE_LABELS: [&str; NUM_STATES] = ["low", "medium", "high"];

/// The Markov-chain regime detector.
///
/// Infers a qualitative regime from the rate of change of a monitored
/// series (funding rate by default). `initialize` rebuilds the transition
/// matrix wholesale from a long lookback; `execute` never updates it — it
/// only classifies the current state from a short fresh window and reads
/// the matching matrix row as the predicted next-state distribution.
pub struct RegimeDetector {
    config: StrategyConfig,
    params: RegimeParams,
    store: Arc<dyn HistoricalDataStore>,

    // Baseline captured at initialize. The same mean/sigma discretizes
    // both the historical window and each tick's fresh window, so state
    // definitions stay stable between ticks.
    baseline_mean: f64,
    baseline_sigma: f64,
    transition_matrix: Vec<Vec<f64>>,
    populated: bool,
}

impl RegimeDetector {
    pub fn new(params: RegimeParams, store: Arc<dyn HistoricalDataStore>) -> Self {
        let parameters = serde_json::to_value(&params).unwrap_or(json!({}));
        Self {
            config: StrategyConfig::new(
                "regime_detector",
                "Markov-chain regime inference over the rate of change of a monitored series",
                parameters,
            ),
            params,
            store,
            baseline_mean: 0.0,
            baseline_sigma: 0.0,
            transition_matrix: vec![vec![0.0; NUM_STATES]; NUM_STATES],
            populated: false,
        }
    }
}

/// Builds a row-normalized `n x n` transition-probability matrix from a
/// state sequence. Rows whose state was never observed stay all-zero
/// rather than becoming NaN.
pub fn build_transition_matrix(states: &[usize], n: usize) -> Vec<Vec<f64>> {
    let mut counts = vec![vec![0.0_f64; n]; n];
    for pair in states.windows(2) {
        if pair[0] < n && pair[1] < n {
            counts[pair[0]][pair[1]] += 1.0;
        }
    }
    for row in counts.iter_mut() {
        let total: f64 = row.iter().sum();
        if total > 0.0 {
            for p in row.iter_mut() {
                *p /= total;
            }
        }
    }
    counts
}

/// Mean of the diagonal (self-transition probabilities). The stability
/// claim of a matrix that was never populated is 0, not NaN.
pub fn stability(matrix: &[Vec<f64>]) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    let diag: f64 = matrix.iter().enumerate().map(|(i, row)| row[i]).sum();
    diag / matrix.len() as f64
}

#[async_trait]
impl Strategy for RegimeDetector {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    async fn initialize(&mut self) -> Result<(), StrategyError> {
        let end = Utc::now();
        let start = end - Duration::hours(self.params.lookback_hours);
        let rows = self
            .store
            .fetch_range(&self.params.series, start, end)
            .await?;
        let values = series(&rows, &self.params.field);

        if values.len() < self.params.min_samples {
            return Err(StrategyError::InsufficientData {
                series: self.params.series.clone(),
                needed: self.params.min_samples,
                got: values.len(),
            });
        }

        let diffs = first_differences(&values);
        self.baseline_mean = mean(&diffs);
        self.baseline_sigma = std_dev(&diffs);

        let states: Vec<usize> = diffs
            .iter()
            .map(|d| discretize_sigma(*d, self.baseline_mean, self.baseline_sigma))
            .collect();
        self.transition_matrix = build_transition_matrix(&states, NUM_STATES);
        self.populated = self
            .transition_matrix
            .iter()
            .any(|row| row.iter().sum::<f64>() > 0.0);

        debug!(
            series = %self.params.series,
            samples = values.len(),
            sigma = self.baseline_sigma,
            "regime baseline rebuilt"
        );
        Ok(())
    }

    async fn execute(&mut self) -> Result<StrategyResult, StrategyError> {
        let end = Utc::now();
        let start = end - Duration::minutes(self.params.recent_window_minutes);
        let rows = self
            .store
            .fetch_range(&self.params.series, start, end)
            .await?;
        let values = series(&rows, &self.params.field);

        let mut result = StrategyResult::now();

        let recent_diffs = first_differences(&values);
        if recent_diffs.is_empty() {
            // Tolerated: the window was empty or held a single point, so
            // this tick simply carries no fresh regime information.
            result.insert_signal("status", json!("insufficient_data"));
            result.insert_metric("confidence", 0.0);
            result.insert_metric("stability", 0.0);
            return Ok(result);
        }

        // The recent window's mean change decides the current state.
        let current = discretize_sigma(
            mean(&recent_diffs),
            self.baseline_mean,
            self.baseline_sigma,
        );

        let row = &self.transition_matrix[current];
        let confidence = clamp01(row.iter().cloned().fold(0.0_f64, f64::max));
        let stability_score = if self.populated {
            clamp01(stability(&self.transition_matrix))
        } else {
            0.0
        };

        let distribution: serde_json::Map<String, serde_json::Value> = STATE_LABELS
            .iter()
            .zip(row.iter())
            .map(|(label, p)| (label.to_string(), json!(clamp01(*p))))
            .collect();

        result.insert_signal("current_regime", json!(STATE_LABELS[current]));
        result.insert_signal(
            "next_state_distribution",
            serde_json::Value::Object(distribution),
        );
        result.insert_metric("confidence", confidence);
        result.insert_metric("stability", stability_score);
        result.insert_metric("current_state", current as f64);

        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        self.transition_matrix = vec![vec![0.0; NUM_STATES]; NUM_STATES];
        self.baseline_mean = 0.0;
        self.baseline_sigma = 0.0;
        self.populated = false;
        Ok(())
    }
}
