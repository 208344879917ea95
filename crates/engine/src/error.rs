use strategies::StrategyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A strategy exhausted its initialize retries. The runner never starts
    /// ticking when any registered strategy cannot build its baseline.
    #[error("Strategy '{strategy}' failed to initialize: {source}")]
    Startup {
        strategy: String,
        #[source]
        source: StrategyError,
    },
}
