use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    /// The lookback window held fewer observations than the module minimum.
    /// Fatal at startup: a thin window means the series or lookback is
    /// misconfigured, so this is never retried internally.
    #[error("Insufficient data for series '{series}': needed {needed} observations, got {got}")]
    InsufficientData {
        series: String,
        needed: usize,
        got: usize,
    },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Data store error: {0}")]
    DataStore(#[from] datastore::DataStoreError),

    #[error("Calculation error: {0}")]
    Calculation(String),
}
