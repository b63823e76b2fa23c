//! Alert acknowledgement from the command line.

use chrono::Utc;
use clap::Parser;

use crate::{
    config::AppConfig,
    engine::acknowledge_alerts,
    persistence::SqliteAlertStore,
};

/// Acknowledges active alerts of a monitor.
#[derive(Parser, Debug)]
pub struct AcknowledgeArgs {
    /// The monitor the alerts belong to.
    #[arg(long)]
    monitor_id: String,
    /// Ids of the alerts to acknowledge.
    #[arg(required = true)]
    alert_ids: Vec<String>,
}

/// Acknowledges the alerts and prints the outcome as JSON.
pub async fn execute(args: AcknowledgeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::new(None)?;
    let store = SqliteAlertStore::new(&config.database_url).await?;
    store.run_migrations().await?;

    let result = acknowledge_alerts(&store, &args.monitor_id, &args.alert_ids, Utc::now()).await;
    store.close().await;
    let result = result?;

    tracing::info!(
        acknowledged = result.acknowledged.len(),
        failed = result.failed.len(),
        missing = result.missing.len(),
        "Acknowledge finished."
    );
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
