//! Dry runs of monitor definitions.

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use clap::Parser;
use thiserror::Error;

use crate::{
    config::AppConfig,
    http_client::HttpClientPool,
    loader::load_config,
    models::{
        destination::{Destination, DestinationConfigError},
        monitor::{Monitor, MonitorConfigError},
        run_result::{MonitorRunResult, PeriodWindow},
    },
    notification::NotificationService,
    persistence::{AlertStore, InMemoryAlertStore, PersistenceError, SqliteAlertStore},
    supervisor::{SupervisorError, build_runner},
};

/// Errors raised by the dry-run command.
#[derive(Error, Debug)]
pub enum DryRunError {
    /// The application configuration is invalid.
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    /// The monitor file is invalid.
    #[error("Monitor loading error: {0}")]
    MonitorLoading(#[from] MonitorConfigError),
    /// The destination file is invalid.
    #[error("Destination loading error: {0}")]
    DestinationLoading(#[from] DestinationConfigError),
    /// The alert store could not be opened.
    #[error("Alert store error: {0}")]
    Persistence(#[from] PersistenceError),
    /// The runner could not be assembled.
    #[error("Runner error: {0}")]
    Runner(#[from] SupervisorError),
    /// The window is empty or reversed.
    #[error("period_start {start} is after period_end {end}")]
    InvalidWindow {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },
    /// The report could not be serialized.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runs monitors once without sending notifications or writing alerts.
#[derive(Parser, Debug)]
pub struct DryRunArgs {
    /// Path to the monitor file to test.
    #[arg(short, long)]
    monitor: PathBuf,
    /// Start of the window, RFC 3339. Defaults to one schedule interval
    /// before `period_end`.
    #[arg(long)]
    period_start: Option<DateTime<Utc>>,
    /// End of the window, RFC 3339. Defaults to now.
    #[arg(long)]
    period_end: Option<DateTime<Utc>>,
    /// Read current alerts from an empty in-memory store instead of the
    /// configured database.
    #[arg(long)]
    no_database: bool,
}

/// The window a dry run covers for `monitor`.
pub fn dry_run_window(
    monitor: &Monitor,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
) -> Result<PeriodWindow, DryRunError> {
    let end = period_end.unwrap_or_else(Utc::now);
    let lookback =
        chrono::Duration::from_std(monitor.schedule.interval()).unwrap_or(chrono::Duration::zero());
    let start = period_start.unwrap_or(end - lookback);
    if start > end {
        return Err(DryRunError::InvalidWindow { start, end });
    }
    Ok(PeriodWindow::new(start, end))
}

/// Executes the dry run and prints one run result per monitor as JSON.
pub async fn execute(args: DryRunArgs) -> Result<(), DryRunError> {
    let config = AppConfig::new(None)?;

    let monitors: Vec<Monitor> = load_config(args.monitor.clone(), &config.throttle_bounds)?;
    let destinations: Vec<Destination> = if config.destination_config_path.exists() {
        load_config(config.destination_config_path.clone(), &config.destination_host_deny_list)?
    } else {
        Vec::new()
    };
    tracing::info!(monitors = monitors.len(), "Monitors loaded for dry run.");

    let store: Arc<dyn AlertStore> = if args.no_database {
        Arc::new(InMemoryAlertStore::new())
    } else {
        let store = SqliteAlertStore::new(&config.database_url).await?;
        store.run_migrations().await?;
        Arc::new(store)
    };

    let client_pool = Arc::new(HttpClientPool::new());
    let transport = Arc::new(NotificationService::new(destinations, client_pool.clone()));
    let runner = build_runner(&config, store, transport, &client_pool).await?;

    let mut results: Vec<MonitorRunResult> = Vec::with_capacity(monitors.len());
    for monitor in &monitors {
        let window = dry_run_window(monitor, args.period_start, args.period_end)?;
        tracing::info!(monitor = %monitor.name, ?window, "Dry running monitor.");
        results.push(runner.run_monitor_with_timeout(monitor, window, true, config.run_timeout).await);
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::test_helpers::MonitorBuilder;

    #[test]
    fn test_window_defaults_to_one_interval() {
        let monitor = MonitorBuilder::new().build();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let window = dry_run_window(&monitor, None, Some(end)).unwrap();

        let interval = chrono::Duration::from_std(monitor.schedule.interval()).unwrap();
        assert_eq!(window.period_end, end);
        assert_eq!(window.period_start, end - interval);
    }

    #[test]
    fn test_reversed_window_is_rejected() {
        let monitor = MonitorBuilder::new().build();
        let end = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let start = end + chrono::Duration::hours(1);

        assert!(matches!(
            dry_run_window(&monitor, Some(start), Some(end)),
            Err(DryRunError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_args_parse() {
        let args = DryRunArgs::try_parse_from([
            "dry-run",
            "--monitor",
            "configs/monitors.yaml",
            "--period-end",
            "2025-03-01T12:00:00Z",
        ])
        .unwrap();
        assert_eq!(args.monitor, PathBuf::from("configs/monitors.yaml"));
        assert_eq!(args.period_end, Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()));
        assert!(args.period_start.is_none());
    }
}
