//! Notification destinations referenced by actions through `destination_id`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    config::HttpRetryConfig,
    loader::{Loadable, LoaderError},
};

/// A generic webhook.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WebhookDestination {
    /// The URL of the webhook endpoint.
    pub url: Url,
    /// HTTP method, POST when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Extra request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// The retry policy for deliveries.
    #[serde(default)]
    pub retry_policy: HttpRetryConfig,
}

/// A Slack incoming webhook.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SlackDestination {
    /// The Slack webhook URL.
    pub slack_url: Url,
    /// The retry policy for deliveries.
    #[serde(default)]
    pub retry_policy: HttpRetryConfig,
}

/// A Discord webhook.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DiscordDestination {
    /// The Discord webhook URL.
    pub discord_url: Url,
    /// The retry policy for deliveries.
    #[serde(default)]
    pub retry_policy: HttpRetryConfig,
}

/// Standard output.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct StdoutDestination {
    /// Print the subject line above the body.
    #[serde(default)]
    pub with_subject: bool,
}

/// The kind of a destination.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// A generic webhook.
    Webhook(WebhookDestination),
    /// A Slack webhook.
    Slack(SlackDestination),
    /// A Discord webhook.
    Discord(DiscordDestination),
    /// Writes messages to standard output.
    Stdout(StdoutDestination),
}

impl DestinationKind {
    /// The URL messages are delivered to, if the destination is remote.
    pub fn url(&self) -> Option<&Url> {
        match self {
            DestinationKind::Webhook(w) => Some(&w.url),
            DestinationKind::Slack(s) => Some(&s.slack_url),
            DestinationKind::Discord(d) => Some(&d.discord_url),
            DestinationKind::Stdout(_) => None,
        }
    }
}

/// A destination loaded from `destinations.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Destination {
    /// The id actions refer to.
    pub id: String,

    /// The kind-specific settings.
    #[serde(flatten)]
    pub kind: DestinationKind,
}

/// Errors raised while validating destinations.
#[derive(Debug, Error)]
pub enum DestinationConfigError {
    /// An error occurred during the loading process.
    #[error("Failed to load destination configuration: {0}")]
    Loader(#[from] LoaderError),

    /// Destination without an id.
    #[error("Destination id cannot be empty.")]
    EmptyId,

    /// Only http and https are delivered to.
    #[error("Destination '{id}' uses unsupported scheme '{scheme}'.")]
    UnsupportedScheme {
        /// Destination id.
        id: String,
        /// The rejected scheme.
        scheme: String,
    },

    /// The URL has no host.
    #[error("Destination '{id}' has no host.")]
    MissingHost {
        /// Destination id.
        id: String,
    },

    /// The host is on the deny list.
    #[error("Destination '{id}' points at denied host '{host}'.")]
    DeniedHost {
        /// Destination id.
        id: String,
        /// The denied host.
        host: String,
    },
}

impl Destination {
    /// Checks the destination against a host deny list. Hosts in the list
    /// are lowercase.
    pub fn validate(&self, deny_list: &[String]) -> Result<(), DestinationConfigError> {
        if self.id.trim().is_empty() {
            return Err(DestinationConfigError::EmptyId);
        }

        let Some(url) = self.kind.url() else {
            return Ok(());
        };

        if !matches!(url.scheme(), "http" | "https") {
            return Err(DestinationConfigError::UnsupportedScheme {
                id: self.id.clone(),
                scheme: url.scheme().to_string(),
            });
        }

        let host = url
            .host_str()
            .ok_or_else(|| DestinationConfigError::MissingHost { id: self.id.clone() })?
            .to_ascii_lowercase();

        if deny_list.iter().any(|denied| *denied == host) {
            return Err(DestinationConfigError::DeniedHost { id: self.id.clone(), host });
        }

        Ok(())
    }
}

impl Loadable for Destination {
    type Context = Vec<String>;
    type Error = DestinationConfigError;

    const KEY: &'static str = "destinations";

    fn validate(&mut self, deny_list: &Vec<String>) -> Result<(), Self::Error> {
        Destination::validate(self, deny_list)
    }
}
