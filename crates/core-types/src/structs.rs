use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Immutable identity and parameter set for a single strategy instance.
///
/// Owned exclusively by the strategy it configures; the `parameters` value
/// holds the module-specific settings as they were deserialized from the
/// application configuration, so a result consumer can always reconstruct
/// exactly which knobs produced a given output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

impl StrategyConfig {
    pub fn new(name: &str, description: &str, parameters: JsonValue) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// A single timestamped market observation row.
///
/// The stored tables vary in shape (prices, funding rates, liquidations,
/// margin snapshots), so observations carry their numeric columns as a
/// field-keyed map rather than a fixed schema. Only field names matter at
/// the call site; the analytics treat each field as an opaque time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, fields: BTreeMap<String, f64>) -> Self {
        Self { timestamp, fields }
    }

    /// Returns the named numeric field, if the row carries it.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}

/// Extracts one named field from a window of observations as a plain series,
/// skipping rows that do not carry the field.
pub fn series(rows: &[Observation], field: &str) -> Vec<f64> {
    rows.iter().filter_map(|row| row.field(field)).collect()
}

/// The output of one strategy execution.
///
/// `signals` carries structured, asset-keyed diagnostic detail (JSON);
/// `metrics` carries flat numeric series suitable for time-series storage
/// and alerting. Results are append-only: once produced they are never
/// mutated, only persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyResult {
    /// Epoch milliseconds at which the result was produced.
    pub timestamp: i64,
    pub signals: serde_json::Map<String, JsonValue>,
    pub metrics: BTreeMap<String, f64>,
}

impl StrategyResult {
    /// Creates an empty result stamped with the current wall clock.
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            signals: serde_json::Map::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn insert_signal(&mut self, key: &str, value: JsonValue) {
        self.signals.insert(key.to_string(), value);
    }

    pub fn insert_metric(&mut self, key: &str, value: f64) {
        self.metrics.insert(key.to_string(), value);
    }
}

/// Clamps a probability or score into `[0, 1]`.
///
/// Every ratio that is semantically a probability passes through this
/// before it is placed into `signals` or `metrics`. NaN collapses to 0 so
/// a degenerate division can never leak into storage; infinities saturate
/// at their end of the scale like any other out-of-range value.
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clamp01_bounds_and_non_finite() {
        assert_eq!(clamp01(0.5), 0.5);
        assert_eq!(clamp01(-0.1), 0.0);
        assert_eq!(clamp01(1.7), 1.0);
        assert_eq!(clamp01(f64::NAN), 0.0);
        // Infinities saturate like any other out-of-range value.
        assert_eq!(clamp01(f64::INFINITY), 1.0);
        assert_eq!(clamp01(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn series_skips_rows_missing_the_field() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let rows = vec![
            Observation::new(t, BTreeMap::from([("price".to_string(), 1.0)])),
            Observation::new(t, BTreeMap::new()),
            Observation::new(t, BTreeMap::from([("price".to_string(), 2.0)])),
        ];
        assert_eq!(series(&rows, "price"), vec![1.0, 2.0]);
    }
}
