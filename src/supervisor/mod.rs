//! The Supervisor drives scheduled monitor runs.
//!
//! Every enabled monitor gets its own task, so runs of one monitor never
//! overlap while different monitors run concurrently. Each task ticks on the
//! monitor's schedule and hands the window since its previous run to the
//! [`MonitorRunner`].
//!
//! ## Shutdown
//!
//! A Ctrl+C or SIGTERM cancels every task. In-flight runs are given
//! `shutdown_timeout` to finish before they are aborted.

mod builder;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use thiserror::Error;
use tokio::{signal, task::JoinSet, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use builder::{SupervisorBuilder, build_runner};
use crate::{
    config::AppConfig,
    engine::MonitorRunner,
    http_client::HttpClientPoolError,
    models::{monitor::Monitor, run_result::PeriodWindow},
};

/// Errors raised while assembling or running the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A required configuration was not provided to the `SupervisorBuilder`.
    #[error("Missing configuration for Supervisor")]
    MissingConfig,

    /// An alert store was not provided to the `SupervisorBuilder`.
    #[error("Missing alert store for Supervisor")]
    MissingAlertStore,

    /// An action references a destination that is not configured.
    #[error("Action '{action}' of monitor '{monitor}' references unknown destination '{destination_id}'")]
    UnknownDestination {
        /// Monitor name.
        monitor: String,
        /// Action name.
        action: String,
        /// The missing destination.
        destination_id: String,
    },

    /// The shared HTTP client could not be created.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] HttpClientPoolError),
}

/// Owns the monitor tasks and their shutdown.
pub struct Supervisor {
    config: Arc<AppConfig>,
    monitors: Vec<Monitor>,
    runner: Arc<MonitorRunner>,
    cancellation_token: CancellationToken,
    join_set: JoinSet<()>,
}

impl Supervisor {
    /// Creates a supervisor for `monitors`.
    pub fn new(config: AppConfig, monitors: Vec<Monitor>, runner: Arc<MonitorRunner>) -> Self {
        Self {
            config: Arc::new(config),
            monitors,
            runner,
            cancellation_token: CancellationToken::new(),
            join_set: JoinSet::new(),
        }
    }

    /// Returns a new `SupervisorBuilder`.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// A token that stops the supervisor when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Runs until a shutdown signal arrives or the token is cancelled.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let signal_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    tracing::info!("Shutdown signal received, stopping monitors.");
                    signal_token.cancel();
                }
                _ = signal_token.cancelled() => {}
            }
        });

        let monitors = std::mem::take(&mut self.monitors);
        let mut scheduled = 0;
        for monitor in monitors {
            if !monitor.enabled {
                tracing::info!(monitor_id = %monitor.id, "Monitor disabled, not scheduling.");
                continue;
            }
            let every = monitor.schedule.interval().max(self.config.polling_interval_ms);
            let task = MonitorTask {
                monitor,
                every,
                run_timeout: self.config.run_timeout,
                runner: Arc::clone(&self.runner),
                cancellation_token: self.cancellation_token.clone(),
            };
            self.join_set.spawn(task.run());
            scheduled += 1;
        }
        tracing::info!(monitors = scheduled, "Supervisor started.");

        loop {
            tokio::select! {
                joined = self.join_set.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "A monitor task failed. Initiating shutdown.");
                        self.cancellation_token.cancel();
                    }
                    None => break,
                },
                _ = self.cancellation_token.cancelled() => break,
            }
        }

        let shutdown_timeout = self.config.shutdown_timeout;
        let drain = async { while self.join_set.join_next().await.is_some() {} };
        if tokio::time::timeout(shutdown_timeout, drain).await.is_err() {
            tracing::warn!(?shutdown_timeout, "Monitor runs did not finish in time, aborting them.");
            self.join_set.shutdown().await;
        }

        tracing::info!("Supervisor shutdown complete.");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register SIGTERM handler.");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// The sequential run loop of one monitor.
struct MonitorTask {
    monitor: Monitor,
    every: Duration,
    run_timeout: Duration,
    runner: Arc<MonitorRunner>,
    cancellation_token: CancellationToken,
}

impl MonitorTask {
    async fn run(self) {
        let mut interval = tokio::time::interval(self.every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let lookback = chrono::Duration::from_std(self.every).unwrap_or(chrono::Duration::zero());
        let mut previous_end = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.cancellation_token.cancelled() => break,
            }

            let period_end = Utc::now();
            let period_start = previous_end.unwrap_or(period_end - lookback);
            let window = PeriodWindow::new(period_start, period_end);

            let result = self
                .runner
                .run_monitor_with_timeout(&self.monitor, window, false, self.run_timeout)
                .await;
            previous_end = Some(period_end);

            match &result.error {
                Some(error) => {
                    tracing::warn!(monitor_id = %self.monitor.id, %error, "Monitor run reported errors.")
                }
                None => tracing::info!(
                    monitor_id = %self.monitor.id,
                    triggers = result.trigger_results.len(),
                    "Monitor run completed."
                ),
            }
        }

        tracing::debug!(monitor_id = %self.monitor.id, "Monitor task stopped.");
    }
}
