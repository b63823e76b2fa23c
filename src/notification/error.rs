//! Error types for the notification service.

use thiserror::Error;

use crate::{
    http_client::HttpClientPoolError, models::notification::FailureClass,
    notification::template::TemplateServiceError,
};

/// Defines the possible errors that can occur while delivering a message.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The action references a destination that is not configured.
    #[error("Destination with id '{0}' not found")]
    DestinationNotFound(String),

    /// The rendered message is empty.
    #[error("Message content missing in the Destination with id: {0}")]
    EmptyMessage(String),

    /// An error related to the template rendering process.
    #[error("Template rendering error: {0}")]
    TemplateError(#[from] TemplateServiceError),

    /// An error originating from the HTTP client pool.
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] HttpClientPoolError),

    /// The request could not be completed, after retries.
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest_middleware::Error),

    /// The destination answered with a server error.
    #[error("Destination returned status {status}")]
    ServerError {
        /// HTTP status code.
        status: u16,
    },

    /// The destination answered with a client error.
    #[error("Destination rejected the message with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// An error related to an invalid destination setting.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An internal error that should not occur under normal circumstances.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl NotificationError {
    /// Classifies the error for escalation decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            NotificationError::DestinationNotFound(_) => FailureClass::DestinationNotFound,
            NotificationError::EmptyMessage(_) | NotificationError::TemplateError(_) =>
                FailureClass::Render,
            NotificationError::RequestError(_) | NotificationError::ServerError { .. } =>
                FailureClass::Unreachable,
            NotificationError::Rejected { .. } => FailureClass::Rejected,
            NotificationError::HttpClientError(_)
            | NotificationError::ConfigError(_)
            | NotificationError::InternalError(_) => FailureClass::Internal,
        }
    }
}
