//! Channel-specific JSON payloads for webhook destinations.

use serde_json::json;

use crate::models::notification::NotificationMessage;

/// Builds the JSON body a webhook provider expects.
pub trait WebhookPayloadBuilder: Send + Sync {
    /// Builds the payload for a rendered message.
    fn build_payload(&self, message: &NotificationMessage) -> serde_json::Value;
}

fn titled(message: &NotificationMessage) -> String {
    if message.title.is_empty() {
        message.body.clone()
    } else {
        format!("*{}*\n\n{}", message.title, message.body)
    }
}

/// Slack `blocks` payload with a single markdown section.
pub struct SlackPayloadBuilder;

impl WebhookPayloadBuilder for SlackPayloadBuilder {
    fn build_payload(&self, message: &NotificationMessage) -> serde_json::Value {
        json!({
            "blocks": [
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": titled(message)
                    }
                }
            ]
        })
    }
}

/// Discord `content` payload.
pub struct DiscordPayloadBuilder;

impl WebhookPayloadBuilder for DiscordPayloadBuilder {
    fn build_payload(&self, message: &NotificationMessage) -> serde_json::Value {
        json!({
            "content": titled(message)
        })
    }
}

/// Unopinionated `{title, body}` payload.
pub struct GenericWebhookPayloadBuilder;

impl WebhookPayloadBuilder for GenericWebhookPayloadBuilder {
    fn build_payload(&self, message: &NotificationMessage) -> serde_json::Value {
        json!({
            "title": message.title,
            "body": message.body
        })
    }
}
