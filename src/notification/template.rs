//! Renders action subjects, messages and query templates with minijinja.

use minijinja::Environment;
use thiserror::Error;

/// Renders templates with the stock minijinja environment.
pub struct TemplateService {
    env: Environment<'static>,
}

/// Error type for the TemplateService.
#[derive(Debug, Error)]
pub enum TemplateServiceError {
    /// The template failed to parse or evaluate.
    #[error("Failed to render template: {0}")]
    RenderError(#[from] minijinja::Error),
}

impl Default for TemplateService {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateService {
    /// Creates a new instance of `TemplateService`.
    pub fn new() -> Self {
        Self { env: Environment::new() }
    }

    /// Renders a template with the given context.
    pub fn render<S: serde::Serialize>(
        &self,
        template_str: &str,
        context: S,
    ) -> Result<String, TemplateServiceError> {
        match self.env.render_str(template_str, context) {
            Ok(rendered_string) => Ok(rendered_string),
            Err(e) => {
                tracing::warn!(error = %e, template = template_str, "Failed to render template.");
                Err(TemplateServiceError::RenderError(e))
            }
        }
    }

    /// Renders every string leaf of a JSON document. Object keys are left
    /// untouched, strings without template markers are copied as is.
    pub fn render_json_strings<S: serde::Serialize + Copy>(
        &self,
        value: &serde_json::Value,
        context: S,
    ) -> Result<serde_json::Value, TemplateServiceError> {
        use serde_json::Value;

        Ok(match value {
            Value::String(s) if s.contains("{{") || s.contains("{%") =>
                Value::String(self.render(s, context)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_json_strings(v, context))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.render_json_strings(v, context)?)))
                    .collect::<Result<_, TemplateServiceError>>()?,
            ),
            other => other.clone(),
        })
    }
}
