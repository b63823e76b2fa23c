//! Alert records and the pieces persisted alongside them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::monitor::SCHEMA_VERSION;

/// Maximum number of entries kept in an alert's error history.
pub const MAX_ERROR_HISTORY: usize = 10;

/// Lifecycle state of an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    /// The trigger condition holds.
    Active,
    /// A user acknowledged the alert; notifications are suppressed.
    Acknowledged,
    /// The trigger condition no longer holds. Terminal.
    Completed,
    /// The last run failed for this alert.
    Error,
}

impl AlertState {
    /// Returns the persisted name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Active => "ACTIVE",
            AlertState::Acknowledged => "ACKNOWLEDGED",
            AlertState::Completed => "COMPLETED",
            AlertState::Error => "ERROR",
        }
    }

    /// Parses a persisted state name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(AlertState::Active),
            "ACKNOWLEDGED" => Some(AlertState::Acknowledged),
            "COMPLETED" => Some(AlertState::Completed),
            "ERROR" => Some(AlertState::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an alert's error history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertError {
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
    /// The error text.
    pub message: String,
}

/// Bookkeeping of one action on one alert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionExecutionResult {
    /// The action this entry belongs to.
    pub action_id: String,
    /// Last successful execution. Unchanged by throttled or failed runs.
    pub last_execution_time: Option<DateTime<Utc>>,
    /// Number of runs suppressed by the throttle.
    pub throttled_count: u32,
}

/// A single bucket of a composite aggregation, as stored on bucket-level
/// alerts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregationResultBucket {
    /// The composite aggregation the bucket came from.
    pub parent_bucket_path: String,
    /// Key values, in composite source order.
    pub bucket_keys: Vec<String>,
    /// Raw bucket content.
    #[serde(default)]
    pub bucket: Map<String, Value>,
}

impl AggregationResultBucket {
    /// Identity of the bucket across runs.
    ///
    /// Key values are joined with `#` without escaping, so `["a#b"]` and
    /// `["a", "b"]` collide.
    pub fn bucket_keys_hash(&self) -> String {
        self.bucket_keys.join("#")
    }
}

/// An alert produced by a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Unique identifier.
    pub id: String,
    /// Optimistic concurrency version. `0` means never persisted.
    #[serde(default)]
    pub version: i64,
    /// Schema version of the alert document.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Owning monitor.
    pub monitor_id: String,
    /// Monitor name at the time of the last write.
    pub monitor_name: String,
    /// Monitor version at the time of the last write.
    #[serde(default)]
    pub monitor_version: u64,
    /// Owning trigger.
    pub trigger_id: String,
    /// Trigger name at the time of the last write.
    pub trigger_name: String,
    /// Trigger severity.
    pub severity: String,
    /// Lifecycle state.
    pub state: AlertState,
    /// When the alert was created.
    pub start_time: DateTime<Utc>,
    /// When the trigger last fired for this alert.
    #[serde(default)]
    pub last_notification_time: Option<DateTime<Utc>>,
    /// When the alert was acknowledged.
    #[serde(default)]
    pub acknowledged_time: Option<DateTime<Utc>>,
    /// Set iff the alert is COMPLETED.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Set iff the alert is in ERROR.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Most recent errors, oldest first.
    #[serde(default)]
    pub error_history: Vec<AlertError>,
    /// Per-action bookkeeping.
    #[serde(default)]
    pub action_execution_results: Vec<ActionExecutionResult>,
    /// Bucket the alert tracks. Bucket-level alerts only.
    #[serde(default)]
    pub agg_alert_content: Option<AggregationResultBucket>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Alert {
    /// Whether the alert is ACKNOWLEDGED.
    pub fn is_acknowledged(&self) -> bool {
        self.state == AlertState::Acknowledged
    }

    /// The bucket key hash of a bucket-level alert.
    pub fn bucket_keys_hash(&self) -> Option<String> {
        self.agg_alert_content.as_ref().map(AggregationResultBucket::bucket_keys_hash)
    }

    /// Appends an error to the history, dropping the oldest entries beyond
    /// [`MAX_ERROR_HISTORY`].
    pub fn push_error_history(&mut self, error: AlertError) {
        self.error_history.push(error);
        if self.error_history.len() > MAX_ERROR_HISTORY {
            let excess = self.error_history.len() - MAX_ERROR_HISTORY;
            self.error_history.drain(..excess);
        }
    }

    /// Returns the bookkeeping entry of an action.
    pub fn action_result(&self, action_id: &str) -> Option<&ActionExecutionResult> {
        self.action_execution_results.iter().find(|r| r.action_id == action_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::test_helpers::AlertBuilder;

    #[test]
    fn test_error_history_keeps_most_recent() {
        let mut alert = AlertBuilder::new("m", "t").build();
        let start = Utc::now();
        for i in 0..13 {
            alert.push_error_history(AlertError {
                timestamp: start + Duration::seconds(i),
                message: format!("error {i}"),
            });
        }

        assert_eq!(alert.error_history.len(), MAX_ERROR_HISTORY);
        assert_eq!(alert.error_history[0].message, "error 3");
        assert_eq!(alert.error_history[9].message, "error 12");
    }

    #[test]
    fn test_bucket_keys_hash_joins_unescaped() {
        let a = AggregationResultBucket {
            parent_bucket_path: "agg".into(),
            bucket_keys: vec!["a#b".into()],
            bucket: Map::new(),
        };
        let b = AggregationResultBucket {
            parent_bucket_path: "agg".into(),
            bucket_keys: vec!["a".into(), "b".into()],
            bucket: Map::new(),
        };
        assert_eq!(a.bucket_keys_hash(), "a#b");
        assert_eq!(a.bucket_keys_hash(), b.bucket_keys_hash());
    }

    #[test]
    fn test_state_names() {
        for state in
            [AlertState::Active, AlertState::Acknowledged, AlertState::Completed, AlertState::Error]
        {
            assert_eq!(AlertState::parse(state.as_str()), Some(state));
            assert_eq!(
                serde_json::to_value(state).unwrap(),
                Value::String(state.as_str().to_string())
            );
        }
        assert_eq!(AlertState::parse("DELETED"), None);
    }
}
