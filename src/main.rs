use clap::{Parser, Subcommand};
use datastore::connection::{connect, run_migrations};
use datastore::repository::DbRepository;
use engine::StrategyRunner;
use std::sync::Arc;
use strategies::create_all_strategies;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// The main entry point for the Argus risk-analytics daemon.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (optional in production).
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => handle_run().await,
    }
}

/// A scheduled quantitative risk-analytics framework for derivatives markets.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the strategy runner on its configured schedule.
    Run,
}

/// Wires configuration, storage and strategies together and starts the loop.
async fn handle_run() -> anyhow::Result<()> {
    let config = configuration::load_config()?;

    let db_pool = connect().await?;
    run_migrations(&db_pool).await?;
    let repository = Arc::new(DbRepository::new(db_pool));

    let strategies = create_all_strategies(&config, repository.clone())?;
    info!(strategies = strategies.len(), "strategy set constructed");

    let (runner, handle) = StrategyRunner::new(strategies, repository, &config.runner);

    // Ctrl-C requests a clean shutdown: the current tick finishes, then
    // every strategy's cleanup runs.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            handle.shutdown();
        }
    });

    runner.start().await?;
    Ok(())
}
