use crate::error::StrategyError;
use crate::Strategy;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use configuration::CascadeParams;
use core_types::{clamp01, StrategyConfig, StrategyResult};
use datastore::HistoricalDataStore;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// An extreme event (liquidation) with its local price impact attached.
#[derive(Debug, Clone, Copy)]
pub struct ImpactEvent {
    pub timestamp: DateTime<Utc>,
    /// Notional size of the event.
    pub size: f64,
    /// Fractional price move around the event timestamp.
    pub impact: f64,
}

/// A closed cascade pattern: a temporally concentrated run of qualifying
/// events. Only the derived aggregates are retained, never the events.
#[derive(Debug, Clone, Copy)]
pub struct Pattern {
    pub event_count: usize,
    pub total_size: f64,
    pub max_size: f64,
    pub max_impact: f64,
}

impl Pattern {
    /// Herfindahl-style concentration: largest single event over the total.
    pub fn concentration(&self) -> f64 {
        if self.total_size <= 0.0 {
            return 0.0;
        }
        clamp01(self.max_size / self.total_size)
    }
}

/// A runtime cluster of at-risk positions with nearby liquidation prices.
#[derive(Debug, Clone)]
pub struct PriceCluster {
    /// Liquidation price of the cluster's anchor position.
    pub anchor_price: f64,
    pub position_count: usize,
    pub total_size: f64,
}

/// The liquidation cascade detector.
///
/// `initialize` mines the historical lookback for cascade patterns with a
/// greedy single-pass windowed merge and retains only their aggregate
/// shapes. `execute` clusters the current at-risk positions by liquidation
/// price proximity and scores how closely the live clusters resemble the
/// mined patterns.
pub struct CascadeDetector {
    config: StrategyConfig,
    params: CascadeParams,
    store: Arc<dyn HistoricalDataStore>,

    // Derived pattern state, rebuilt on initialize.
    pattern_sizes: Vec<usize>,
    avg_concentration: f64,
    pattern_count: usize,
}

impl CascadeDetector {
    pub fn new(params: CascadeParams, store: Arc<dyn HistoricalDataStore>) -> Self {
        let parameters = serde_json::to_value(&params).unwrap_or(json!({}));
        Self {
            config: StrategyConfig::new(
                "cascade_detector",
                "Clusters temporally and price-concentrated liquidation events and scores cascade risk",
                parameters,
            ),
            params,
            store,
            pattern_sizes: Vec::new(),
            avg_concentration: 0.0,
            pattern_count: 0,
        }
    }
}

/// Local price impact of an event: the fractional move between the nearest
/// price print at or before the event and the nearest print at or after it.
/// Returns 0 when either side is missing or the before-price is non-positive.
pub fn price_impact(
    prices: &[(DateTime<Utc>, f64)],
    event_time: DateTime<Utc>,
) -> f64 {
    let before = prices
        .iter()
        .rev()
        .find(|(t, _)| *t <= event_time)
        .map(|(_, p)| *p);
    let after = prices
        .iter()
        .find(|(t, _)| *t >= event_time)
        .map(|(_, p)| *p);

    match (before, after) {
        (Some(b), Some(a)) if b > 0.0 => ((a - b) / b).abs(),
        _ => 0.0,
    }
}

/// Greedy single-pass windowed merge of impact events into patterns.
///
/// A new pattern opens on the first event whose impact exceeds `threshold`
/// and extends with any subsequent qualifying event within `window` of the
/// pattern's current end. A closed pattern is retained only when it holds
/// at least `min_size` events and its max impact clears the threshold;
/// sub-threshold patterns are discarded entirely.
pub fn detect_patterns(
    events: &[ImpactEvent],
    threshold: f64,
    window: Duration,
    min_size: usize,
) -> Vec<Pattern> {
    let mut patterns = Vec::new();
    let mut open: Option<(Pattern, DateTime<Utc>)> = None;

    for event in events {
        if event.impact < threshold {
            continue;
        }
        match open.as_mut() {
            Some((pattern, end)) if event.timestamp - *end <= window => {
                pattern.event_count += 1;
                pattern.total_size += event.size;
                pattern.max_size = pattern.max_size.max(event.size);
                pattern.max_impact = pattern.max_impact.max(event.impact);
                *end = event.timestamp;
            }
            _ => {
                if let Some((pattern, _)) = open.take() {
                    if pattern.event_count >= min_size && pattern.max_impact >= threshold {
                        patterns.push(pattern);
                    }
                }
                open = Some((
                    Pattern {
                        event_count: 1,
                        total_size: event.size,
                        max_size: event.size,
                        max_impact: event.impact,
                    },
                    event.timestamp,
                ));
            }
        }
    }

    if let Some((pattern, _)) = open {
        if pattern.event_count >= min_size && pattern.max_impact >= threshold {
            patterns.push(pattern);
        }
    }
    patterns
}

/// Clusters positions (liquidation price, size) by price proximity:
/// sorted by price, a position joins the current cluster while its price is
/// within `proximity_pct` of the cluster anchor, otherwise it opens a new one.
pub fn cluster_positions(positions: &[(f64, f64)], proximity_pct: f64) -> Vec<PriceCluster> {
    let mut sorted: Vec<(f64, f64)> = positions
        .iter()
        .copied()
        .filter(|(price, _)| *price > 0.0)
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut clusters: Vec<PriceCluster> = Vec::new();
    for (price, size) in sorted {
        match clusters.last_mut() {
            Some(cluster)
                if (price - cluster.anchor_price).abs()
                    <= cluster.anchor_price * proximity_pct =>
            {
                cluster.position_count += 1;
                cluster.total_size += size;
            }
            _ => clusters.push(PriceCluster {
                anchor_price: price,
                position_count: 1,
                total_size: size,
            }),
        }
    }
    clusters
}

/// Combines cluster/pattern similarity into a cascade probability.
///
/// Half the weight goes to how closely the mean live cluster size matches
/// the mean historical pattern size, half to how closely the live
/// concentration matches the historical average, scaled by how many
/// clusters exist relative to the minimum cascade size and clamped to 1.
pub fn cascade_probability(
    clusters: &[PriceCluster],
    pattern_sizes: &[usize],
    avg_concentration: f64,
    min_cascade_size: usize,
) -> f64 {
    if clusters.is_empty() || pattern_sizes.is_empty() || min_cascade_size == 0 {
        return 0.0;
    }

    let mean_cluster = clusters.iter().map(|c| c.position_count as f64).sum::<f64>()
        / clusters.len() as f64;
    let mean_pattern =
        pattern_sizes.iter().map(|&s| s as f64).sum::<f64>() / pattern_sizes.len() as f64;
    let size_similarity = if mean_cluster > 0.0 && mean_pattern > 0.0 {
        mean_cluster.min(mean_pattern) / mean_cluster.max(mean_pattern)
    } else {
        0.0
    };

    let total_size: f64 = clusters.iter().map(|c| c.total_size).sum();
    let largest: f64 = clusters
        .iter()
        .map(|c| c.total_size)
        .fold(0.0_f64, f64::max);
    let current_concentration = if total_size > 0.0 {
        largest / total_size
    } else {
        0.0
    };
    let concentration_similarity = 1.0 - (current_concentration - avg_concentration).abs();

    let scale = clusters.len() as f64 / min_cascade_size as f64;
    clamp01((0.5 * size_similarity + 0.5 * concentration_similarity) * scale)
}

#[async_trait]
impl Strategy for CascadeDetector {
    fn config(&self) -> &StrategyConfig {
        &self.config
    }

    async fn initialize(&mut self) -> Result<(), StrategyError> {
        let end = Utc::now();
        let start = end - Duration::days(self.params.lookback_days);

        let price_rows = self
            .store
            .fetch_range(&self.params.price_series, start, end)
            .await?;
        if price_rows.len() < self.params.min_samples {
            return Err(StrategyError::InsufficientData {
                series: self.params.price_series.clone(),
                needed: self.params.min_samples,
                got: price_rows.len(),
            });
        }
        let prices: Vec<(DateTime<Utc>, f64)> = price_rows
            .iter()
            .filter_map(|row| row.field("price").map(|p| (row.timestamp, p)))
            .collect();

        let event_rows = self
            .store
            .fetch_range(&self.params.event_series, start, end)
            .await?;
        let events: Vec<ImpactEvent> = event_rows
            .iter()
            .filter_map(|row| {
                row.field("size").map(|size| ImpactEvent {
                    timestamp: row.timestamp,
                    size,
                    impact: price_impact(&prices, row.timestamp),
                })
            })
            .collect();

        let patterns = detect_patterns(
            &events,
            self.params.price_impact_threshold,
            Duration::minutes(self.params.cascade_window_minutes),
            self.params.min_cascade_size,
        );

        self.pattern_sizes = patterns.iter().map(|p| p.event_count).collect();
        self.avg_concentration = if patterns.is_empty() {
            0.0
        } else {
            patterns.iter().map(Pattern::concentration).sum::<f64>() / patterns.len() as f64
        };
        self.pattern_count = patterns.len();

        debug!(
            events = events.len(),
            patterns = self.pattern_count,
            "cascade pattern baseline rebuilt"
        );
        Ok(())
    }

    async fn execute(&mut self) -> Result<StrategyResult, StrategyError> {
        let end = Utc::now();
        let start = end - Duration::minutes(self.params.recent_window_minutes);
        let position_rows = self
            .store
            .fetch_range(&self.params.position_series, start, end)
            .await?;

        let positions: Vec<(f64, f64)> = position_rows
            .iter()
            .filter_map(|row| {
                match (row.field("liquidation_price"), row.field("size")) {
                    (Some(price), Some(size)) => Some((price, size)),
                    _ => None,
                }
            })
            .collect();

        let clusters = cluster_positions(&positions, self.params.cluster_proximity_pct);
        let probability = cascade_probability(
            &clusters,
            &self.pattern_sizes,
            self.avg_concentration,
            self.params.min_cascade_size,
        );

        let cluster_detail: Vec<serde_json::Value> = clusters
            .iter()
            .map(|c| {
                json!({
                    "anchor_price": c.anchor_price,
                    "position_count": c.position_count,
                    "total_size": c.total_size,
                })
            })
            .collect();

        let mut result = StrategyResult::now();
        result.insert_signal("clusters", json!(cluster_detail));
        result.insert_signal("historical_avg_concentration", json!(self.avg_concentration));
        result.insert_metric("cascade_probability", probability);
        result.insert_metric("historical_pattern_count", self.pattern_count as f64);
        result.insert_metric("current_cluster_count", clusters.len() as f64);
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<(), StrategyError> {
        self.pattern_sizes = Vec::new();
        self.avg_concentration = 0.0;
        self.pattern_count = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap()
    }

    fn event(minute: i64, impact: f64) -> ImpactEvent {
        ImpactEvent {
            timestamp: at(minute),
            size: 100.0,
            impact,
        }
    }

    #[test]
    fn all_sub_threshold_events_yield_no_patterns() {
        let events: Vec<ImpactEvent> = (0..10).map(|i| event(i, 0.001)).collect();
        let patterns = detect_patterns(&events, 0.02, Duration::minutes(15), 3);
        assert!(patterns.is_empty());
    }

    #[test]
    fn qualifying_events_within_window_form_one_pattern() {
        let events: Vec<ImpactEvent> = (0..5).map(|i| event(i * 5, 0.05)).collect();
        let patterns = detect_patterns(&events, 0.02, Duration::minutes(15), 3);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].event_count, 5);
    }

    #[test]
    fn gap_larger_than_window_splits_patterns() {
        let mut events: Vec<ImpactEvent> = (0..3).map(|i| event(i * 5, 0.05)).collect();
        events.extend((0..3).map(|i| event(100 + i * 5, 0.05)));
        let patterns = detect_patterns(&events, 0.02, Duration::minutes(15), 3);
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn undersized_patterns_are_discarded() {
        let events: Vec<ImpactEvent> = (0..2).map(|i| event(i * 5, 0.05)).collect();
        let patterns = detect_patterns(&events, 0.02, Duration::minutes(15), 3);
        assert!(patterns.is_empty());
    }

    #[test]
    fn impact_uses_nearest_before_and_after_prices() {
        let prices = vec![(at(0), 100.0), (at(10), 95.0), (at(20), 99.0)];
        let impact = price_impact(&prices, at(5));
        // Before: 100 at t=0, after: 95 at t=10.
        assert!((impact - 0.05).abs() < 1e-12);
        // No price at or before the event.
        assert_eq!(price_impact(&prices[1..], at(5)), 0.0);
    }

    #[test]
    fn nearby_liquidation_prices_cluster_together() {
        let positions = vec![
            (100.0, 10.0),
            (100.5, 20.0), // within 1% of 100
            (105.0, 5.0),  // new cluster
        ];
        let clusters = cluster_positions(&positions, 0.01);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].position_count, 2);
        assert!((clusters[0].total_size - 30.0).abs() < 1e-12);
    }

    #[test]
    fn probability_is_clamped_and_zero_without_history() {
        let clusters = vec![PriceCluster {
            anchor_price: 100.0,
            position_count: 4,
            total_size: 40.0,
        }];
        assert_eq!(cascade_probability(&clusters, &[], 0.5, 3), 0.0);

        let many: Vec<PriceCluster> = (0..20)
            .map(|i| PriceCluster {
                anchor_price: 100.0 + i as f64,
                position_count: 4,
                total_size: 40.0,
            })
            .collect();
        let p = cascade_probability(&many, &[4, 4, 4], 0.05, 3);
        assert!((0.0..=1.0).contains(&p), "probability was {p}");
    }
}
