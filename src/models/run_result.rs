//! The record produced by one monitor run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{alert::AggregationResultBucket, notification::FailureClass};

/// The time window a run covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeriodWindow {
    /// Start of the window.
    pub period_start: DateTime<Utc>,
    /// End of the window, usually the invocation time.
    pub period_end: DateTime<Utc>,
}

impl PeriodWindow {
    /// Creates a window.
    pub fn new(period_start: DateTime<Utc>, period_end: DateTime<Utc>) -> Self {
        Self { period_start, period_end }
    }
}

/// Results of the monitor's inputs, positionally aligned with the inputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InputRunResults {
    /// One entry per input. A failed input is `null`.
    pub results: Vec<Value>,
    /// Aggregated error text of the failed inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one action execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActionRunResult {
    /// Action id.
    pub action_id: String,
    /// Action name.
    pub action_name: String,
    /// Rendered output, `subject` and `message`.
    #[serde(default)]
    pub output: BTreeMap<String, String>,
    /// Whether the throttle suppressed the execution.
    #[serde(default)]
    pub throttled: bool,
    /// Set when the action was sent successfully.
    #[serde(default)]
    pub execution_time: Option<DateTime<Utc>>,
    /// Failure text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of `error`. Only meaningful within the run.
    #[serde(skip)]
    pub failure_class: Option<FailureClass>,
}

/// Outcome of a query-level trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct QueryLevelTriggerRunResult {
    /// Trigger name.
    pub trigger_name: String,
    /// Whether the condition held.
    pub triggered: bool,
    /// Evaluation error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Action id to result.
    #[serde(default)]
    pub action_results: BTreeMap<String, ActionRunResult>,
}

/// Outcome of a bucket-level trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BucketLevelTriggerRunResult {
    /// Trigger name.
    pub trigger_name: String,
    /// Evaluation error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Matched buckets keyed by bucket key hash.
    pub agg_result_buckets: BTreeMap<String, AggregationResultBucket>,
    /// Bucket key hash to action id to result.
    #[serde(default)]
    pub action_results: BTreeMap<String, BTreeMap<String, ActionRunResult>>,
}

impl BucketLevelTriggerRunResult {
    /// Merges the result of the current page into the results accumulated
    /// from previous pages.
    ///
    /// Buckets and action results are concatenated; on overlapping bucket
    /// hashes the current page wins. The most recent error wins.
    pub fn combine(curr: Self, prev: Option<Self>) -> Self {
        let Some(mut merged) = prev else {
            return curr;
        };

        for (hash, bucket) in curr.agg_result_buckets {
            if merged.agg_result_buckets.insert(hash.clone(), bucket).is_some() {
                tracing::warn!(
                    trigger = %curr.trigger_name,
                    bucket = %hash,
                    "Bucket returned by more than one page, keeping the latest."
                );
            }
        }
        for (hash, results) in curr.action_results {
            if merged.action_results.insert(hash.clone(), results).is_some() {
                tracing::warn!(
                    trigger = %curr.trigger_name,
                    bucket = %hash,
                    "Action results recorded by more than one page, keeping the latest."
                );
            }
        }

        merged.trigger_name = curr.trigger_name;
        merged.error = curr.error.or(merged.error);
        merged
    }
}

/// Outcome of one trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TriggerRunResult {
    /// Bucket-level outcome. Listed first so untagged deserialization
    /// recognizes `agg_result_buckets`.
    BucketLevel(BucketLevelTriggerRunResult),
    /// Query-level outcome.
    QueryLevel(QueryLevelTriggerRunResult),
}

impl TriggerRunResult {
    /// The evaluation error, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            TriggerRunResult::QueryLevel(r) => r.error.as_deref(),
            TriggerRunResult::BucketLevel(r) => r.error.as_deref(),
        }
    }
}

/// The record of a monitor run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorRunResult {
    /// Name of the monitor.
    pub monitor_name: String,
    /// Start of the covered window.
    pub period_start: DateTime<Utc>,
    /// End of the covered window.
    pub period_end: DateTime<Utc>,
    /// Run-level error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Input results.
    pub input_results: InputRunResults,
    /// Trigger id to outcome.
    pub trigger_results: BTreeMap<String, TriggerRunResult>,
}

impl MonitorRunResult {
    /// Creates an empty result for a monitor and window.
    pub fn new(monitor_name: impl Into<String>, window: &PeriodWindow) -> Self {
        Self {
            monitor_name: monitor_name.into(),
            period_start: window.period_start,
            period_end: window.period_end,
            error: None,
            input_results: InputRunResults::default(),
            trigger_results: BTreeMap::new(),
        }
    }

    /// Appends a run-level error, keeping earlier ones.
    pub fn push_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{existing}\n{error}"),
            None => error,
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    fn bucket(key: &str) -> AggregationResultBucket {
        AggregationResultBucket {
            parent_bucket_path: "agg".into(),
            bucket_keys: vec![key.into()],
            bucket: Map::new(),
        }
    }

    fn page(keys: &[&str], error: Option<&str>) -> BucketLevelTriggerRunResult {
        BucketLevelTriggerRunResult {
            trigger_name: "t".into(),
            error: error.map(str::to_string),
            agg_result_buckets: keys.iter().map(|k| (k.to_string(), bucket(k))).collect(),
            action_results: keys.iter().map(|k| (k.to_string(), BTreeMap::new())).collect(),
        }
    }

    #[test]
    fn test_combine_without_previous_returns_current() {
        let curr = page(&["a"], None);
        assert_eq!(BucketLevelTriggerRunResult::combine(curr.clone(), None), curr);
    }

    #[test]
    fn test_combine_concatenates_pages() {
        let merged =
            BucketLevelTriggerRunResult::combine(page(&["b", "c"], None), Some(page(&["a"], None)));

        assert_eq!(
            merged.agg_result_buckets.keys().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
        assert_eq!(merged.action_results.len(), 3);
        assert!(merged.error.is_none());
    }

    #[test]
    fn test_combine_most_recent_error_wins() {
        let merged = BucketLevelTriggerRunResult::combine(
            page(&[], Some("second")),
            Some(page(&[], Some("first"))),
        );
        assert_eq!(merged.error.as_deref(), Some("second"));

        let merged =
            BucketLevelTriggerRunResult::combine(page(&[], None), Some(page(&[], Some("first"))));
        assert_eq!(merged.error.as_deref(), Some("first"));
    }

    #[test]
    fn test_untagged_trigger_result_shape() {
        let result = TriggerRunResult::QueryLevel(QueryLevelTriggerRunResult {
            trigger_name: "t".into(),
            triggered: true,
            ..Default::default()
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["triggered"], Value::Bool(true));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_push_error_appends() {
        let window = PeriodWindow::new(Utc::now(), Utc::now());
        let mut result = MonitorRunResult::new("m", &window);
        result.push_error("one");
        result.push_error("two");
        assert_eq!(result.error.as_deref(), Some("one\ntwo"));
    }
}
