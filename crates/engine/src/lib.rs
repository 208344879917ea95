//! # Argus Engine
//!
//! The scheduling loop that owns the registered strategies and drives them
//! on a fixed cadence.
//!
//! ## Scheduling model
//!
//! A single loop, no overlapping ticks: within one tick every strategy's
//! `execute` is dispatched in parallel and the tick waits for all of them
//! to settle before the next sleep is computed. The sleep is
//! `interval − elapsed`, floored at zero, so a slow tick delays the next
//! one instead of stacking.
//!
//! ## Failure model
//!
//! `initialize`, `execute` and `cleanup` each run through the same bounded
//! retry loop with a fixed delay. Exhausting retries during startup aborts
//! the runner before any tick is scheduled; exhausting them during a tick
//! only skips that strategy for that tick — the others, and the loop,
//! keep going. Result-sink failures are swallowed one layer down, in
//! `strategies::log_result`.

pub mod error;

pub use error::EngineError;

use configuration::RunnerSettings;
use core_types::StrategyResult;
use datastore::ResultSink;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use strategies::{log_result, Strategy, StrategyError};
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

type SharedStrategy = Arc<Mutex<Box<dyn Strategy>>>;

#[derive(Debug, Clone, Copy)]
enum LifecycleOp {
    Initialize,
    Execute,
    Cleanup,
}

impl LifecycleOp {
    fn name(self) -> &'static str {
        match self {
            LifecycleOp::Initialize => "initialize",
            LifecycleOp::Execute => "execute",
            LifecycleOp::Cleanup => "cleanup",
        }
    }
}

/// Runs one lifecycle operation with bounded retries and a fixed delay.
///
/// `attempts` is the total number of tries; a value of 0 is treated as 1.
/// An explicit loop rather than recursion, so the call stack stays flat no
/// matter how many retries are configured.
async fn run_with_retries(
    strategy: &SharedStrategy,
    op: LifecycleOp,
    attempts: u32,
    delay: Duration,
) -> Result<Option<StrategyResult>, StrategyError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = {
            let mut guard = strategy.lock().await;
            match op {
                LifecycleOp::Initialize => guard.initialize().await.map(|_| None),
                LifecycleOp::Execute => guard.execute().await.map(Some),
                LifecycleOp::Cleanup => guard.cleanup().await.map(|_| None),
            }
        };
        match outcome {
            Ok(result) => return Ok(result),
            Err(e) if attempt < attempts => {
                warn!(
                    op = op.name(),
                    attempt,
                    attempts,
                    error = %e,
                    "strategy operation failed; retrying after fixed delay"
                );
                attempt += 1;
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A cloneable handle for requesting a clean runner shutdown.
#[derive(Clone)]
pub struct RunnerHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl RunnerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The scheduler that owns the strategy collection and the result sink.
pub struct StrategyRunner {
    strategies: Vec<SharedStrategy>,
    sink: Arc<dyn ResultSink>,
    interval: Duration,
    retry_count: u32,
    retry_delay: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl StrategyRunner {
    pub fn new(
        strategies: Vec<Box<dyn Strategy>>,
        sink: Arc<dyn ResultSink>,
        settings: &RunnerSettings,
    ) -> (Self, RunnerHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = Self {
            strategies: strategies
                .into_iter()
                .map(|s| Arc::new(Mutex::new(s)))
                .collect(),
            sink,
            interval: Duration::from_secs(settings.interval_secs),
            retry_count: settings.retry_count,
            retry_delay: Duration::from_secs(settings.retry_delay_secs),
            shutdown_rx,
        };
        let handle = RunnerHandle {
            shutdown_tx: Arc::new(shutdown_tx),
        };
        (runner, handle)
    }

    /// Initializes every strategy, then ticks until shutdown.
    ///
    /// Any initialize exhausting its retries aborts the start — the loop
    /// never begins with a strategy that has no baseline.
    pub async fn start(mut self) -> Result<(), EngineError> {
        for strategy in &self.strategies {
            let name = strategy.lock().await.config().name.clone();
            info!(strategy = %name, "initializing strategy");
            run_with_retries(
                strategy,
                LifecycleOp::Initialize,
                self.retry_count,
                self.retry_delay,
            )
            .await
            .map_err(|source| EngineError::Startup {
                strategy: name.clone(),
                source,
            })?;
        }

        info!(
            strategies = self.strategies.len(),
            interval_secs = self.interval.as_secs(),
            "runner started"
        );

        loop {
            let tick_started = Instant::now();
            self.run_tick().await;
            let elapsed = tick_started.elapsed();
            let delay = self.interval.saturating_sub(elapsed);

            tokio::select! {
                _ = sleep(delay) => {}
                changed = self.shutdown_rx.changed() => {
                    // A dropped handle resolves `changed()` with Err on
                    // every iteration; that is not a wake-up. No shutdown
                    // can arrive anymore, so just keep pacing.
                    if changed.is_err() {
                        sleep(delay).await;
                    }
                }
            }
            if *self.shutdown_rx.borrow() {
                break;
            }
        }

        info!("runner stopping; cleaning up strategies");
        for strategy in &self.strategies {
            let name = strategy.lock().await.config().name.clone();
            if let Err(e) = run_with_retries(
                strategy,
                LifecycleOp::Cleanup,
                self.retry_count,
                self.retry_delay,
            )
            .await
            {
                warn!(strategy = %name, error = %e, "cleanup failed");
            }
        }
        Ok(())
    }

    /// Runs one tick: all strategies dispatched in parallel, one join point.
    ///
    /// A strategy exhausting its execute retries is logged and skipped for
    /// this tick; it never halts the others.
    pub async fn run_tick(&self) {
        let tasks = self.strategies.iter().map(|strategy| {
            let strategy = Arc::clone(strategy);
            let sink = Arc::clone(&self.sink);
            let retry_count = self.retry_count;
            let retry_delay = self.retry_delay;
            async move {
                let name = strategy.lock().await.config().name.clone();
                match run_with_retries(&strategy, LifecycleOp::Execute, retry_count, retry_delay)
                    .await
                {
                    Ok(Some(result)) => {
                        log_result(sink.as_ref(), &name, &result).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(
                            strategy = %name,
                            error = %e,
                            "strategy execution failed after all retries; skipping this tick"
                        );
                    }
                }
            }
        });
        join_all(tasks).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::StrategyConfig;
    use datastore::DataStoreError;
    use serde_json::json;

    struct FlakyStrategy {
        config: StrategyConfig,
        init_failures: u32,
        exec_failures: u32,
        executions: u32,
        cleaned_up: bool,
    }

    impl FlakyStrategy {
        fn new(name: &str, init_failures: u32, exec_failures: u32) -> Self {
            Self {
                config: StrategyConfig::new(name, "test strategy", json!({})),
                init_failures,
                exec_failures,
                executions: 0,
                cleaned_up: false,
            }
        }

        fn failure(&self) -> StrategyError {
            StrategyError::Calculation("injected failure".to_string())
        }
    }

    #[async_trait]
    impl Strategy for FlakyStrategy {
        fn config(&self) -> &StrategyConfig {
            &self.config
        }

        async fn initialize(&mut self) -> Result<(), StrategyError> {
            if self.init_failures > 0 {
                self.init_failures -= 1;
                return Err(self.failure());
            }
            Ok(())
        }

        async fn execute(&mut self) -> Result<StrategyResult, StrategyError> {
            if self.exec_failures > 0 {
                self.exec_failures -= 1;
                return Err(self.failure());
            }
            self.executions += 1;
            Ok(StrategyResult::now())
        }

        async fn cleanup(&mut self) -> Result<(), StrategyError> {
            self.cleaned_up = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        results: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResultSink for MemorySink {
        async fn log_result(
            &self,
            strategy: &str,
            _result: &StrategyResult,
        ) -> Result<(), DataStoreError> {
            self.results.lock().unwrap().push(strategy.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn log_result(
            &self,
            _strategy: &str,
            _result: &StrategyResult,
        ) -> Result<(), DataStoreError> {
            Err(DataStoreError::ConnectionConfig("sink down".to_string()))
        }
    }

    fn settings(retry_count: u32) -> RunnerSettings {
        RunnerSettings {
            interval_secs: 3600,
            retry_count,
            retry_delay_secs: 0,
        }
    }

    #[tokio::test]
    async fn flaky_execute_still_produces_one_result() {
        let sink = Arc::new(MemorySink::default());
        let strategies: Vec<Box<dyn Strategy>> =
            vec![Box::new(FlakyStrategy::new("flaky", 0, 2))];
        let (runner, _handle) = StrategyRunner::new(strategies, sink.clone(), &settings(3));

        runner.run_tick().await;

        assert_eq!(sink.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_execute_skips_tick_but_not_others() {
        let sink = Arc::new(MemorySink::default());
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(FlakyStrategy::new("broken", 0, u32::MAX)),
            Box::new(FlakyStrategy::new("healthy", 0, 0)),
        ];
        let (runner, _handle) = StrategyRunner::new(strategies, sink.clone(), &settings(2));

        runner.run_tick().await;
        // The next tick must still run after an exhausted strategy.
        runner.run_tick().await;

        let results = sink.results.lock().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|name| name == "healthy"));
    }

    #[tokio::test]
    async fn sink_failure_never_aborts_the_tick() {
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(FlakyStrategy::new("a", 0, 0)),
            Box::new(FlakyStrategy::new("b", 0, 0)),
        ];
        let (runner, _handle) = StrategyRunner::new(strategies, Arc::new(FailingSink), &settings(1));

        // Swallowed sink failures: the tick settles and the next one runs.
        runner.run_tick().await;
        runner.run_tick().await;
    }

    #[tokio::test]
    async fn initialize_exhaustion_aborts_start() {
        let sink = Arc::new(MemorySink::default());
        let strategies: Vec<Box<dyn Strategy>> =
            vec![Box::new(FlakyStrategy::new("never_ready", u32::MAX, 0))];
        let (runner, _handle) = StrategyRunner::new(strategies, sink.clone(), &settings(2));

        let result = runner.start().await;
        assert!(matches!(result, Err(EngineError::Startup { .. })));
        assert!(sink.results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropped_handle_keeps_ticks_paced() {
        let sink = Arc::new(MemorySink::default());
        let strategies: Vec<Box<dyn Strategy>> =
            vec![Box::new(FlakyStrategy::new("steady", 0, 0))];
        let (runner, handle) = StrategyRunner::new(strategies, sink.clone(), &settings(1));
        // With no sender left, the loop must still honor the interval
        // instead of spinning ticks back to back.
        drop(handle);

        let task = tokio::spawn(runner.start());
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.abort();

        assert_eq!(sink.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn initialize_recovers_within_retry_budget() {
        let sink = Arc::new(MemorySink::default());
        let strategies: Vec<Box<dyn Strategy>> =
            vec![Box::new(FlakyStrategy::new("slow_start", 1, 0))];
        let (mut runner, handle) = StrategyRunner::new(strategies, sink.clone(), &settings(2));
        // Stop the loop after the first tick's sleep is interrupted.
        handle.shutdown();
        // Shorten the interval so the test does not sleep for an hour.
        runner.interval = Duration::from_millis(10);

        runner.start().await.expect("start should succeed");

        assert_eq!(sink.results.lock().unwrap().len(), 1);
    }
}
