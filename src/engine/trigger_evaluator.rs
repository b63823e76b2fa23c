//! Evaluates query-level conditions and bucket-level selectors.

use std::{collections::BTreeMap, sync::Arc};

use regex::Regex;
use serde_json::{Map, Value, json};

use super::{
    input::find_aggregation,
    rhai::{EvaluationError, ExpressionEvaluator},
};
use crate::models::{
    alert::{AggregationResultBucket, Alert},
    monitor::Monitor,
    run_result::{
        BucketLevelTriggerRunResult, InputRunResults, PeriodWindow, QueryLevelTriggerRunResult,
    },
    trigger::{BucketFilter, BucketLevelTrigger, QueryLevelTrigger, Trigger},
};

/// Evaluates trigger conditions against input results.
pub struct TriggerEvaluator {
    evaluator: Arc<dyn ExpressionEvaluator>,
}

/// Builds the context conditions and templates see: `results`,
/// `periodStart`, `periodEnd`, `alert`, and `monitor`/`trigger` summaries.
pub fn trigger_context(
    monitor: &Monitor,
    trigger: &Trigger,
    inputs: &InputRunResults,
    window: &PeriodWindow,
    alert: Option<&Alert>,
) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("results".into(), Value::Array(inputs.results.clone()));
    context.insert("periodStart".into(), json!(window.period_start.to_rfc3339()));
    context.insert("periodEnd".into(), json!(window.period_end.to_rfc3339()));
    context.insert("alert".into(), alert.map_or(Value::Null, alert_summary));
    context.insert(
        "monitor".into(),
        json!({
            "id": monitor.id,
            "name": monitor.name,
            "monitor_type": monitor.monitor_type,
            "version": monitor.version,
        }),
    );
    context.insert(
        "trigger".into(),
        json!({
            "id": trigger.id(),
            "name": trigger.name(),
            "severity": trigger.severity(),
        }),
    );
    context
}

fn alert_summary(alert: &Alert) -> Value {
    serde_json::to_value(alert).unwrap_or(Value::Null)
}

impl TriggerEvaluator {
    /// Creates an evaluator delegating to `evaluator`.
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Evaluates a query-level condition. A failed evaluation is reported
    /// as not triggered with an error.
    pub fn run_query_level(
        &self,
        trigger: &QueryLevelTrigger,
        context: &Map<String, Value>,
    ) -> QueryLevelTriggerRunResult {
        let (triggered, error) = match self.evaluator.evaluate(&trigger.condition, context) {
            Ok(triggered) => (triggered, None),
            Err(e) => {
                tracing::warn!(trigger_id = %trigger.id, error = %e, "Trigger evaluation failed.");
                (false, Some(e.to_string()))
            }
        };

        QueryLevelTriggerRunResult {
            trigger_name: trigger.name.clone(),
            triggered,
            error,
            action_results: BTreeMap::new(),
        }
    }

    /// Selects the buckets of the trigger's composite aggregation for which
    /// the selector script holds.
    ///
    /// On an evaluation error no bucket is reported as matched.
    pub fn run_bucket_level(
        &self,
        trigger: &BucketLevelTrigger,
        inputs: &InputRunResults,
        base_context: &Map<String, Value>,
    ) -> BucketLevelTriggerRunResult {
        let mut result = BucketLevelTriggerRunResult {
            trigger_name: trigger.name.clone(),
            ..Default::default()
        };

        match self.select_buckets(trigger, inputs, base_context) {
            Ok(buckets) => result.agg_result_buckets = buckets,
            Err(e) => {
                tracing::warn!(trigger_id = %trigger.id, error = %e, "Bucket selection failed.");
                result.error = Some(e.to_string());
            }
        }
        result
    }

    fn select_buckets(
        &self,
        trigger: &BucketLevelTrigger,
        inputs: &InputRunResults,
        base_context: &Map<String, Value>,
    ) -> Result<BTreeMap<String, AggregationResultBucket>, BucketSelectionError> {
        let selector = &trigger.condition;
        let filter = KeyFilter::new(selector.filter.as_ref())?;

        let mut matched = BTreeMap::new();
        let mut found_aggregation = false;

        for result in inputs.results.iter().filter(|r| !r.is_null()) {
            let Some(aggregation) = find_aggregation(result, &selector.parent_bucket_path) else {
                continue;
            };
            found_aggregation = true;

            let buckets = aggregation.get("buckets").and_then(Value::as_array);
            for bucket in buckets.into_iter().flatten().filter_map(Value::as_object) {
                let bucket_keys = bucket_key_values(bucket);
                if !filter.accepts(&bucket_keys) {
                    continue;
                }

                let mut context = base_context.clone();
                context.insert("params".into(), Value::Object(bind_params(selector, bucket)));
                context.insert("_key".into(), bucket.get("key").cloned().unwrap_or(Value::Null));

                if self.evaluator.evaluate(&selector.script, &context)? {
                    let bucket = AggregationResultBucket {
                        parent_bucket_path: selector.parent_bucket_path.clone(),
                        bucket_keys,
                        bucket: bucket.clone(),
                    };
                    matched.insert(bucket.bucket_keys_hash(), bucket);
                }
            }
        }

        let has_results = inputs.results.iter().any(|r| !r.is_null());
        if has_results && !found_aggregation {
            return Err(BucketSelectionError::MissingAggregation(
                selector.parent_bucket_path.clone(),
            ));
        }

        Ok(matched)
    }
}

#[derive(Debug, thiserror::Error)]
enum BucketSelectionError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("Invalid bucket key filter '{pattern}': {source}")]
    InvalidFilter { pattern: String, source: regex::Error },

    #[error("Aggregation '{0}' not found in input results")]
    MissingAggregation(String),
}

struct KeyFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl KeyFilter {
    fn new(filter: Option<&BucketFilter>) -> Result<Self, BucketSelectionError> {
        let compile = |pattern: &Option<String>| {
            pattern
                .as_ref()
                .map(|p| {
                    Regex::new(&format!("^(?:{p})$")).map_err(|source| {
                        BucketSelectionError::InvalidFilter { pattern: p.clone(), source }
                    })
                })
                .transpose()
        };
        Ok(Self {
            include: compile(&filter.and_then(|f| f.include.clone()))?,
            exclude: compile(&filter.and_then(|f| f.exclude.clone()))?,
        })
    }

    fn accepts(&self, keys: &[String]) -> bool {
        if let Some(include) = &self.include {
            if !keys.iter().any(|k| include.is_match(k)) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if keys.iter().any(|k| exclude.is_match(k)) {
                return false;
            }
        }
        true
    }
}

/// Key values of a bucket, in composite source order.
fn bucket_key_values(bucket: &Map<String, Value>) -> Vec<String> {
    match bucket.get("key") {
        Some(Value::Object(key)) => key.values().map(key_value_to_string).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(scalar) => vec![key_value_to_string(scalar)],
    }
}

fn key_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolves `buckets_path` against a bucket.
fn bind_params(
    selector: &crate::models::trigger::BucketSelector,
    bucket: &Map<String, Value>,
) -> Map<String, Value> {
    selector
        .buckets_path
        .iter()
        .map(|(name, path)| (name.clone(), resolve_bucket_path(bucket, path)))
        .collect()
}

fn resolve_bucket_path(bucket: &Map<String, Value>, path: &str) -> Value {
    match path {
        "_count" => bucket.get("doc_count").cloned().unwrap_or(Value::Null),
        "_key" => bucket.get("key").cloned().unwrap_or(Value::Null),
        _ => {
            let mut segments = path.split(['>', '.']);
            let Some(first) = segments.next() else {
                return Value::Null;
            };
            let mut current = bucket.get(first);
            for segment in segments {
                current = current.and_then(|v| v.get(segment));
            }
            match current {
                Some(Value::Object(metric)) if metric.contains_key("value") => metric["value"].clone(),
                Some(value) => value.clone(),
                None => Value::Null,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RhaiConfig,
        engine::rhai::{MockExpressionEvaluator, RhaiCompiler, RhaiEvaluator},
        models::trigger::BucketSelector,
        test_helpers::{MonitorBuilder, TriggerBuilder},
    };

    fn rhai() -> TriggerEvaluator {
        TriggerEvaluator::new(Arc::new(RhaiEvaluator::new(Arc::new(RhaiCompiler::new(
            &RhaiConfig::default(),
        )))))
    }

    fn window() -> PeriodWindow {
        PeriodWindow::new(chrono::Utc::now(), chrono::Utc::now())
    }

    fn selector(script: &str) -> BucketLevelTrigger {
        BucketLevelTrigger {
            id: "t1".into(),
            name: "errors by host".into(),
            severity: "1".into(),
            condition: BucketSelector {
                parent_bucket_path: "by_host".into(),
                buckets_path: BTreeMap::from([
                    ("count".to_string(), "_count".to_string()),
                    ("avg_latency".to_string(), "latency".to_string()),
                ]),
                script: script.into(),
                filter: None,
            },
            actions: vec![],
        }
    }

    fn composite_result() -> InputRunResults {
        InputRunResults {
            results: vec![json!({
                "aggregations": {
                    "by_host": {
                        "after_key": { "host": "c", "dc": "eu" },
                        "buckets": [
                            { "key": { "host": "a", "dc": "eu" }, "doc_count": 12, "latency": { "value": 80.5 } },
                            { "key": { "host": "b", "dc": "us" }, "doc_count": 2, "latency": { "value": 300.0 } },
                            { "key": { "host": "c", "dc": "eu" }, "doc_count": 40, "latency": { "value": 10.0 } }
                        ]
                    }
                }
            })],
            error: None,
        }
    }

    #[test]
    fn test_query_level_context_keys() {
        let monitor = MonitorBuilder::new().build();
        let trigger = monitor.triggers[0].clone();
        let inputs = InputRunResults { results: vec![json!({ "hits": {} })], error: None };

        let context = trigger_context(&monitor, &trigger, &inputs, &window(), None);

        assert_eq!(context["results"], json!([{ "hits": {} }]));
        assert_eq!(context["alert"], Value::Null);
        assert_eq!(context["monitor"]["name"], json!(monitor.name));
        assert_eq!(context["trigger"]["id"], json!(trigger.id()));
        assert!(context.contains_key("periodStart"));
        assert!(context.contains_key("periodEnd"));
    }

    #[test]
    fn test_query_level_evaluation_error_is_not_triggered() {
        let mut evaluator = MockExpressionEvaluator::new();
        evaluator
            .expect_evaluate()
            .returning(|_, _| Err(EvaluationError::NonBoolean("string".into())));
        let evaluator = TriggerEvaluator::new(Arc::new(evaluator));

        let trigger = match TriggerBuilder::query_level("t1").build() {
            Trigger::QueryLevel(t) => t,
            Trigger::BucketLevel(_) => unreachable!(),
        };
        let result = evaluator.run_query_level(&trigger, &Map::new());

        assert!(!result.triggered);
        assert_eq!(
            result.error.as_deref(),
            Some("Condition must evaluate to a boolean, got 'string'")
        );
    }

    #[test]
    fn test_bucket_selection_binds_params() {
        let result = rhai().run_bucket_level(
            &selector("params.count > 5 && params.avg_latency > 50.0"),
            &composite_result(),
            &Map::new(),
        );

        assert!(result.error.is_none());
        assert_eq!(result.agg_result_buckets.keys().collect::<Vec<_>>(), vec!["a#eu"]);
        let bucket = &result.agg_result_buckets["a#eu"];
        assert_eq!(bucket.bucket_keys, vec!["a".to_string(), "eu".to_string()]);
        assert_eq!(bucket.parent_bucket_path, "by_host");
        assert_eq!(bucket.bucket["doc_count"], json!(12));
    }

    #[test]
    fn test_bucket_filter_include_and_exclude() {
        let mut trigger = selector("true");
        trigger.condition.filter =
            Some(BucketFilter { include: Some("eu".into()), exclude: Some("c".into()) });

        let result = rhai().run_bucket_level(&trigger, &composite_result(), &Map::new());
        assert_eq!(result.agg_result_buckets.keys().collect::<Vec<_>>(), vec!["a#eu"]);
    }

    #[test]
    fn test_bucket_script_error_matches_nothing() {
        let result = rhai().run_bucket_level(&selector("params.count"), &composite_result(), &Map::new());
        assert!(result.agg_result_buckets.is_empty());
        assert!(result.error.unwrap().contains("boolean"));
    }

    #[test]
    fn test_missing_aggregation_is_an_error() {
        let inputs = InputRunResults { results: vec![json!({ "hits": {} })], error: None };
        let result = rhai().run_bucket_level(&selector("true"), &inputs, &Map::new());
        assert_eq!(result.error.as_deref(), Some("Aggregation 'by_host' not found in input results"));
    }

    #[test]
    fn test_failed_inputs_are_skipped_silently() {
        let inputs = InputRunResults { results: vec![Value::Null], error: Some("down".into()) };
        let result = rhai().run_bucket_level(&selector("true"), &inputs, &Map::new());
        assert!(result.error.is_none());
        assert!(result.agg_result_buckets.is_empty());
    }

    #[test]
    fn test_resolve_bucket_path_variants() {
        let bucket = json!({
            "key": { "host": "a" },
            "doc_count": 3,
            "stats": { "max": 9, "nested": { "value": 1.5 } }
        });
        let bucket = bucket.as_object().unwrap();

        assert_eq!(resolve_bucket_path(bucket, "_count"), json!(3));
        assert_eq!(resolve_bucket_path(bucket, "_key"), json!({ "host": "a" }));
        assert_eq!(resolve_bucket_path(bucket, "stats.max"), json!(9));
        assert_eq!(resolve_bucket_path(bucket, "stats>nested"), json!(1.5));
        assert_eq!(resolve_bucket_path(bucket, "absent"), Value::Null);
    }
}
