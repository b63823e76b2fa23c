//! Data models for notifications.

use serde::{Deserialize, Serialize};

/// A rendered message handed to a notification transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotificationMessage {
    /// The rendered subject line. Empty when the action has no subject
    /// template.
    pub title: String,
    /// The rendered message body.
    pub body: String,
}

impl NotificationMessage {
    /// Creates a new message from a subject and a body.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { title: title.into(), body: body.into() }
    }
}

/// Classification of a failed delivery. Decides whether the failure puts
/// the alert into ERROR.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Subject or message could not be rendered, or rendered empty.
    Render,
    /// The action references a destination that is not configured.
    DestinationNotFound,
    /// The destination could not be reached (connect errors, timeouts,
    /// 5xx after retries).
    Unreachable,
    /// The destination answered with a client error.
    Rejected,
    /// Anything else.
    Internal,
}
