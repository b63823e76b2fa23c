//! This module provides the `SupervisorBuilder` for constructing a `Supervisor`.

use std::sync::Arc;

use super::{Supervisor, SupervisorError};
use crate::{
    config::AppConfig,
    engine::{
        ActionDispatcher, MonitorRunner, RhaiCompiler, RhaiEvaluator, SearchInputExecutor,
    },
    http_client::HttpClientPool,
    models::{destination::Destination, monitor::Monitor},
    notification::{NotificationService, TemplateService},
    persistence::AlertStore,
};

/// A builder for creating a `Supervisor` instance.
#[derive(Default)]
pub struct SupervisorBuilder {
    config: Option<AppConfig>,
    store: Option<Arc<dyn AlertStore>>,
    monitors: Vec<Monitor>,
    destinations: Vec<Destination>,
}

impl SupervisorBuilder {
    /// Creates a new, empty `SupervisorBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the application configuration.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the alert store.
    pub fn store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the monitors to schedule.
    pub fn monitors(mut self, monitors: Vec<Monitor>) -> Self {
        self.monitors = monitors;
        self
    }

    /// Sets the notification destinations.
    pub fn destinations(mut self, destinations: Vec<Destination>) -> Self {
        self.destinations = destinations;
        self
    }

    /// Wires the runner and checks that every action points at a configured
    /// destination.
    pub async fn build(self) -> Result<Supervisor, SupervisorError> {
        let config = self.config.ok_or(SupervisorError::MissingConfig)?;
        let store = self.store.ok_or(SupervisorError::MissingAlertStore)?;

        let client_pool = Arc::new(HttpClientPool::new());
        let notification_service = NotificationService::new(self.destinations, client_pool.clone());

        for monitor in &self.monitors {
            for action in monitor.triggers.iter().flat_map(|t| t.actions()) {
                if !notification_service.has_destination(&action.destination_id) {
                    return Err(SupervisorError::UnknownDestination {
                        monitor: monitor.name.clone(),
                        action: action.name.clone(),
                        destination_id: action.destination_id.clone(),
                    });
                }
            }
        }

        let runner = build_runner(&config, store, Arc::new(notification_service), &client_pool).await?;

        tracing::info!(monitors = self.monitors.len(), "Supervisor assembled.");
        Ok(Supervisor::new(config, self.monitors, Arc::new(runner)))
    }
}

/// Wires a [`MonitorRunner`] against the configured search cluster.
pub async fn build_runner(
    config: &AppConfig,
    store: Arc<dyn AlertStore>,
    transport: Arc<NotificationService>,
    client_pool: &HttpClientPool,
) -> Result<MonitorRunner, SupervisorError> {
    let templates = Arc::new(TemplateService::new());
    let search_client = client_pool.get_or_create(&config.http_retry_config).await?;
    let input_executor =
        SearchInputExecutor::new(config.search_url.clone(), search_client, templates.clone());
    let evaluator = RhaiEvaluator::new(Arc::new(RhaiCompiler::new(&config.rhai)));
    let dispatcher = ActionDispatcher::new(transport, templates, &config.escalating_failures);

    Ok(MonitorRunner::new(
        Arc::new(input_executor),
        Arc::new(evaluator),
        dispatcher,
        store,
        config.max_bucket_pages,
    ))
}
