use chrono::{DateTime, Utc};
use serde_json::Map;

use crate::models::{
    alert::{AggregationResultBucket, Alert, AlertState},
    monitor::SCHEMA_VERSION,
};

/// A builder for creating `Alert` instances for testing.
pub struct AlertBuilder {
    id: String,
    monitor_id: String,
    trigger_id: String,
    version: i64,
    state: AlertState,
    start_time: DateTime<Utc>,
    bucket_keys: Option<Vec<String>>,
}

impl AlertBuilder {
    /// An ACTIVE, never persisted alert of the given monitor and trigger.
    pub fn new(monitor_id: &str, trigger_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            monitor_id: monitor_id.to_string(),
            trigger_id: trigger_id.to_string(),
            version: 0,
            state: AlertState::Active,
            start_time: Utc::now(),
            bucket_keys: None,
        }
    }

    /// Sets the alert id.
    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// Sets the stored version.
    pub fn version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Sets the state.
    pub fn state(mut self, state: AlertState) -> Self {
        self.state = state;
        self
    }

    /// Sets the start time.
    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Makes the alert track the bucket with these keys of `composite_agg`.
    pub fn bucket(mut self, keys: &[&str]) -> Self {
        self.bucket_keys = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Builds the `Alert`.
    pub fn build(self) -> Alert {
        let end_time = (self.state == AlertState::Completed).then_some(self.start_time);
        let error_message = (self.state == AlertState::Error).then(|| "error".to_string());
        Alert {
            id: self.id,
            version: self.version,
            schema_version: SCHEMA_VERSION,
            monitor_id: self.monitor_id,
            monitor_name: "Test Monitor".to_string(),
            monitor_version: 1,
            trigger_id: self.trigger_id.clone(),
            trigger_name: format!("{} trigger", self.trigger_id),
            severity: "1".to_string(),
            state: self.state,
            start_time: self.start_time,
            last_notification_time: Some(self.start_time),
            acknowledged_time: None,
            end_time,
            error_message,
            error_history: Vec::new(),
            action_execution_results: Vec::new(),
            agg_alert_content: self.bucket_keys.map(|bucket_keys| AggregationResultBucket {
                parent_bucket_path: "composite_agg".to_string(),
                bucket_keys,
                bucket: Map::new(),
            }),
        }
    }
}
