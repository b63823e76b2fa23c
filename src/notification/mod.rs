//! # Notification Service
//!
//! Delivers rendered action messages to destinations.
//!
//! ## Core Components
//!
//! - **`NotificationTransport`**: the seam the action dispatcher sends through.
//! - **`NotificationService`**: the production transport. It holds the loaded
//!   destinations and a shared `HttpClientPool`.
//! - **`AsWebhookComponents`**: reduces each webhook-style destination (Slack,
//!   Discord, generic) to a URL, a retry policy and a payload builder, so all
//!   of them are delivered by the same `WebhookNotifier`.
//!
//! Failures are returned as [`NotificationError`], whose
//! [`failure_class`](NotificationError::failure_class) decides whether the
//! alert is escalated to ERROR.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::{
    config::HttpRetryConfig,
    http_client::HttpClientPool,
    models::{
        destination::{
            Destination, DestinationKind, DiscordDestination, SlackDestination, WebhookDestination,
        },
        notification::NotificationMessage,
    },
};

pub mod error;
pub mod payload_builder;
mod stdout;
pub mod template;
mod webhook;

pub use error::NotificationError;
pub use template::{TemplateService, TemplateServiceError};

pub use crate::models::notification::FailureClass;
use self::{stdout::StdoutNotifier, webhook::WebhookNotifier};
use payload_builder::{
    DiscordPayloadBuilder, GenericWebhookPayloadBuilder, SlackPayloadBuilder,
    WebhookPayloadBuilder,
};

/// Sends a rendered message to a destination.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Delivers `message` to the destination and returns the destination's
    /// response text.
    async fn send(
        &self,
        destination_id: &str,
        message: &NotificationMessage,
    ) -> Result<String, NotificationError>;
}

struct WebhookComponents {
    config: webhook::WebhookConfig,
    retry_policy: HttpRetryConfig,
    builder: Box<dyn WebhookPayloadBuilder>,
}

trait AsWebhookComponents {
    /// Returns `None` for destinations that are not delivered over HTTP.
    fn as_webhook_components(&self) -> Option<WebhookComponents>;
}

impl AsWebhookComponents for DestinationKind {
    fn as_webhook_components(&self) -> Option<WebhookComponents> {
        let (url, method, headers, builder, retry_policy): (_, _, _, _, HttpRetryConfig) =
            match self {
                DestinationKind::Webhook(WebhookDestination {
                    url,
                    method,
                    headers,
                    retry_policy,
                }) => (
                    url.clone(),
                    method.clone(),
                    headers.clone(),
                    Box::new(GenericWebhookPayloadBuilder) as Box<dyn WebhookPayloadBuilder>,
                    retry_policy.clone(),
                ),
                DestinationKind::Slack(SlackDestination { slack_url, retry_policy }) => (
                    slack_url.clone(),
                    None,
                    None,
                    Box::new(SlackPayloadBuilder),
                    retry_policy.clone(),
                ),
                DestinationKind::Discord(DiscordDestination { discord_url, retry_policy }) => (
                    discord_url.clone(),
                    None,
                    None,
                    Box::new(DiscordPayloadBuilder),
                    retry_policy.clone(),
                ),
                DestinationKind::Stdout(_) => return None,
            };

        Some(WebhookComponents {
            config: webhook::WebhookConfig { url, method, headers },
            retry_policy,
            builder,
        })
    }
}

/// Delivers messages to the destinations loaded at startup.
pub struct NotificationService {
    client_pool: Arc<HttpClientPool>,
    destinations: HashMap<String, DestinationKind>,
}

impl NotificationService {
    /// Creates a new `NotificationService`.
    pub fn new(destinations: Vec<Destination>, client_pool: Arc<HttpClientPool>) -> Self {
        let destinations = destinations.into_iter().map(|d| (d.id, d.kind)).collect();
        Self { client_pool, destinations }
    }

    /// Whether a destination with this id is configured.
    pub fn has_destination(&self, destination_id: &str) -> bool {
        self.destinations.contains_key(destination_id)
    }
}

#[async_trait]
impl NotificationTransport for NotificationService {
    #[tracing::instrument(skip(self, message), level = "debug")]
    async fn send(
        &self,
        destination_id: &str,
        message: &NotificationMessage,
    ) -> Result<String, NotificationError> {
        let destination = self
            .destinations
            .get(destination_id)
            .ok_or_else(|| NotificationError::DestinationNotFound(destination_id.to_string()))?;

        if message.body.trim().is_empty() {
            return Err(NotificationError::EmptyMessage(destination_id.to_string()));
        }

        let Some(components) = destination.as_webhook_components() else {
            if let DestinationKind::Stdout(config) = destination {
                return Ok(StdoutNotifier::new(config).notify(destination_id, message));
            }
            return Err(NotificationError::InternalError(format!(
                "Destination '{destination_id}' has no delivery channel"
            )));
        };

        let http_client = self.client_pool.get_or_create(&components.retry_policy).await?;
        let payload = components.builder.build_payload(message);
        let notifier = WebhookNotifier::new(components.config, http_client)?;

        let response = notifier.notify_json(&payload).await?;
        tracing::debug!(destination_id, "Notification delivered.");
        Ok(response)
    }
}
