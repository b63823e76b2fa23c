use std::sync::Arc;

use clap::{Parser, Subcommand};
use periscope::{
    cmd::{AcknowledgeArgs, DryRunArgs, acknowledge, dry_run},
    config::AppConfig,
    loader::load_config,
    models::{destination::Destination, monitor::Monitor},
    persistence::SqliteAlertStore,
    supervisor::Supervisor,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs every enabled monitor on its schedule.
    Run,
    /// Runs monitors once without notifying or writing alerts.
    DryRun(DryRunArgs),
    /// Acknowledges active alerts.
    Acknowledge(AcknowledgeArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber =
        FmtSubscriber::builder().with_env_filter(EnvFilter::from_default_env()).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_supervisor().await?,
        Commands::DryRun(args) => dry_run::execute(args).await?,
        Commands::Acknowledge(args) => acknowledge::execute(args).await?,
    }

    Ok(())
}

async fn run_supervisor() -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!("Loading application configuration...");
    let config = AppConfig::new(None)?;
    tracing::debug!(database_url = %config.database_url, search_url = %config.search_url, "Configuration loaded.");

    let monitors: Vec<Monitor> =
        load_config(config.monitor_config_path.clone(), &config.throttle_bounds)?;
    let destinations: Vec<Destination> = load_config(
        config.destination_config_path.clone(),
        &config.destination_host_deny_list,
    )?;
    tracing::info!(
        monitors = monitors.len(),
        destinations = destinations.len(),
        "Monitor and destination definitions loaded."
    );

    tracing::debug!("Initializing alert store...");
    let store = Arc::new(SqliteAlertStore::new(&config.database_url).await?);
    store.run_migrations().await?;

    let supervisor = Supervisor::builder()
        .config(config)
        .store(store.clone())
        .monitors(monitors)
        .destinations(destinations)
        .build()
        .await?;

    tracing::info!("Supervisor initialized, starting monitors...");
    supervisor.run().await?;

    store.close().await;
    Ok(())
}
