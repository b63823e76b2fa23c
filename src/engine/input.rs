//! Executes monitor inputs against the data store.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::{Map, Value, json};
use thiserror::Error;
use url::Url;

use crate::{
    models::{
        monitor::{ClusterMetricsInput, Input, SearchInput},
        run_result::{InputRunResults, PeriodWindow},
    },
    notification::{TemplateService, TemplateServiceError},
};

/// Errors raised while executing an input.
#[derive(Debug, Error)]
pub enum InputError {
    /// The query template failed to render.
    #[error(transparent)]
    Template(#[from] TemplateServiceError),

    /// The request could not be built.
    #[error("Invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request failed after retries.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),

    /// The data store answered with a non-success status.
    #[error("Data store returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response was not JSON.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Runs one input for a time window.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InputExecutor: Send + Sync {
    /// Executes `input` over `window` and returns the raw result document.
    async fn execute(&self, input: &Input, window: &PeriodWindow) -> Result<Value, InputError>;
}

/// Executes inputs against the HTTP search API of the data store.
pub struct SearchInputExecutor {
    base_url: Url,
    client: Arc<ClientWithMiddleware>,
    templates: Arc<TemplateService>,
}

impl SearchInputExecutor {
    /// Creates an executor for the data store at `base_url`.
    pub fn new(
        base_url: Url,
        client: Arc<ClientWithMiddleware>,
        templates: Arc<TemplateService>,
    ) -> Self {
        Self { base_url, client, templates }
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))
    }

    async fn search(&self, input: &SearchInput, window: &PeriodWindow) -> Result<Value, InputError> {
        let context = json!({
            "period_start": window.period_start.to_rfc3339(),
            "period_end": window.period_end.to_rfc3339(),
        });
        let query = self.templates.render_json_strings(&input.query, &context)?;

        let path = if input.indices.is_empty() {
            "_search".to_string()
        } else {
            format!("{}/_search", input.indices.join(","))
        };
        let url = self.endpoint(&path)?;

        tracing::debug!(%url, "Executing search input.");
        let response = self.client.post(url).json(&query).send().await?;
        Self::read_json(response).await
    }

    async fn cluster_metrics(&self, input: &ClusterMetricsInput) -> Result<Value, InputError> {
        let url = self.endpoint(&input.path)?;
        tracing::debug!(%url, "Executing cluster metrics input.");
        let response = self.client.get(url).send().await?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, InputError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| InputError::Decode(e.to_string()))?;

        if !status.is_success() {
            return Err(InputError::Status { status: status.as_u16(), body });
        }

        serde_json::from_str(&body).map_err(|e| InputError::Decode(e.to_string()))
    }
}

#[async_trait]
impl InputExecutor for SearchInputExecutor {
    async fn execute(&self, input: &Input, window: &PeriodWindow) -> Result<Value, InputError> {
        match input {
            Input::Search(search) => self.search(search, window).await,
            Input::ClusterMetrics(metrics) => self.cluster_metrics(metrics).await,
        }
    }
}

/// Runs every input in order. A failed input occupies its position as
/// `null` and its error is appended to the aggregated error text.
pub async fn collect_input_results(
    executor: &dyn InputExecutor,
    inputs: &[Input],
    window: &PeriodWindow,
) -> InputRunResults {
    let mut results = Vec::with_capacity(inputs.len());
    let mut errors = Vec::new();

    for (index, input) in inputs.iter().enumerate() {
        match executor.execute(input, window).await {
            Ok(value) => results.push(value),
            Err(e) => {
                tracing::warn!(input = index, error = %e, "Input failed.");
                errors.push(e.to_string());
                results.push(Value::Null);
            }
        }
    }

    InputRunResults {
        results,
        error: if errors.is_empty() { None } else { Some(errors.join("\n")) },
    }
}

/// Sets `after` on the composite aggregation named `name`, wherever it is
/// nested in the query. Returns whether the aggregation was found.
pub fn rewrite_query_with_after_key(query: &mut Value, name: &str, after_key: &Value) -> bool {
    let Some(object) = query.as_object_mut() else {
        return false;
    };

    let mut found = false;
    for aggs_key in ["aggs", "aggregations"] {
        let Some(Value::Object(aggs)) = object.get_mut(aggs_key) else {
            continue;
        };
        for (agg_name, agg) in aggs.iter_mut() {
            if agg_name == name {
                if let Some(Value::Object(composite)) = agg.get_mut("composite") {
                    composite.insert("after".to_string(), after_key.clone());
                    found = true;
                }
            }
            found |= rewrite_query_with_after_key(agg, name, after_key);
        }
    }
    if let Some(inner) = object.get_mut("query") {
        found |= rewrite_query_with_after_key(inner, name, after_key);
    }
    found
}

/// Extracts the `after_key` of the aggregation named `name` from a search
/// response, following `>` or `.` separated paths.
pub fn find_after_key(result: &Value, name: &str) -> Option<Value> {
    find_aggregation(result, name)?.get("after_key").filter(|v| !v.is_null()).cloned()
}

/// Locates an aggregation in a search response.
pub fn find_aggregation<'a>(result: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
    let mut current = result.get("aggregations")?;
    for segment in path.split(['>', '.']) {
        current = current.get(segment)?;
    }
    current.as_object()
}
