//! Delivers JSON payloads to webhook endpoints.

use std::{collections::HashMap, sync::Arc};

use reqwest::{
    Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use super::error::NotificationError;

/// A webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Endpoint URL.
    pub url: Url,
    /// HTTP method, POST when absent.
    pub method: Option<String>,
    /// Extra request headers.
    pub headers: Option<HashMap<String, String>>,
}

/// Sends payloads to one webhook endpoint.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: Url,
    method: Method,
    headers: HeaderMap,
    client: Arc<ClientWithMiddleware>,
}

impl WebhookNotifier {
    /// Creates a notifier, validating the method and headers.
    pub fn new(
        config: WebhookConfig,
        client: Arc<ClientWithMiddleware>,
    ) -> Result<Self, NotificationError> {
        let method = match config.method.as_deref() {
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|e| NotificationError::ConfigError(format!("Invalid method {m}: {e}")))?,
            None => Method::POST,
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        );
        for (key, value) in config.headers.unwrap_or_default() {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                NotificationError::ConfigError(format!("Invalid header name: {key}: {e}"))
            })?;
            let value = HeaderValue::from_str(&value).map_err(|e| {
                NotificationError::ConfigError(format!("Invalid header value for {key}: {e}"))
            })?;
            headers.insert(name, value);
        }

        Ok(Self { url: config.url, method, headers, client })
    }

    /// Sends a JSON payload and returns the response body.
    pub async fn notify_json(
        &self,
        payload: &serde_json::Value,
    ) -> Result<String, NotificationError> {
        let response = self
            .client
            .request(self.method.clone(), self.url.as_str())
            .headers(self.headers.clone())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_server_error() {
            return Err(NotificationError::ServerError { status: status.as_u16() });
        }
        if !status.is_success() {
            return Err(NotificationError::Rejected { status: status.as_u16(), body });
        }

        Ok(body)
    }
}
