//! Computes alert state transitions from a trigger outcome and the alerts
//! currently persisted for the trigger.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    models::{
        action::AlertCategory,
        alert::{ActionExecutionResult, AggregationResultBucket, Alert, AlertError, AlertState},
        monitor::{Monitor, SCHEMA_VERSION},
        run_result::ActionRunResult,
        trigger::Trigger,
    },
    persistence::{AlertStore, PersistenceError},
};

/// Prefix of alert errors caused by failed inputs.
pub const ERROR_FETCHING_INPUTS: &str = "Error fetching inputs:\n";
/// Prefix of alert errors caused by failed condition evaluation.
pub const FAILED_EVALUATING_TRIGGER: &str = "Failed evaluating trigger:\n";
/// Prefix of alert errors caused by escalating action failures.
pub const FAILED_RUNNING_ACTION: &str = "Failed running action:\n";

/// The error sources of one trigger run.
#[derive(Debug, Clone, Default)]
pub struct RunErrors {
    /// Aggregated input error text.
    pub input: Option<String>,
    /// Condition evaluation error.
    pub evaluation: Option<String>,
    /// First escalating action failure.
    pub action: Option<String>,
}

impl RunErrors {
    /// Whether the trigger outcome itself is unusable. Action failures do not
    /// count: they are only known after dispatch.
    pub fn blocks_dispatch(&self) -> bool {
        self.input.is_some() || self.evaluation.is_some()
    }

    /// The message recorded on the alert. Input errors take precedence over
    /// evaluation errors, which take precedence over action failures.
    pub fn alert_error(&self) -> Option<String> {
        if let Some(e) = &self.input {
            return Some(format!("{ERROR_FETCHING_INPUTS}{e}"));
        }
        if let Some(e) = &self.evaluation {
            return Some(format!("{FAILED_EVALUATING_TRIGGER}{e}"));
        }
        self.action.as_ref().map(|e| format!("{FAILED_RUNNING_ACTION}{e}"))
    }
}

/// The write a reconciled alert needs.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertUpdate {
    /// Nothing to write.
    NoChange,
    /// Insert or update a non-completed alert.
    Upsert {
        /// The alert to write.
        alert: Alert,
        /// The version the alert was read with, `0` for new alerts.
        expected_version: i64,
    },
    /// Move the alert into history.
    Complete {
        /// The completed alert.
        alert: Alert,
        /// The version the alert was read with.
        expected_version: i64,
    },
}

impl AlertUpdate {
    /// The alert carried by the update.
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            AlertUpdate::NoChange => None,
            AlertUpdate::Upsert { alert, .. } | AlertUpdate::Complete { alert, .. } => Some(alert),
        }
    }
}

fn new_alert(
    monitor: &Monitor,
    trigger: &Trigger,
    state: AlertState,
    now: DateTime<Utc>,
) -> Alert {
    Alert {
        id: Uuid::new_v4().to_string(),
        version: 0,
        schema_version: SCHEMA_VERSION,
        monitor_id: monitor.id.clone(),
        monitor_name: monitor.name.clone(),
        monitor_version: monitor.version,
        trigger_id: trigger.id().to_string(),
        trigger_name: trigger.name().to_string(),
        severity: trigger.severity().to_string(),
        state,
        start_time: now,
        last_notification_time: Some(now),
        acknowledged_time: None,
        end_time: None,
        error_message: None,
        error_history: Vec::new(),
        action_execution_results: Vec::new(),
        agg_alert_content: None,
    }
}

fn refresh_metadata(alert: &mut Alert, monitor: &Monitor, trigger: &Trigger) {
    alert.schema_version = SCHEMA_VERSION;
    alert.monitor_name = monitor.name.clone();
    alert.monitor_version = monitor.version;
    alert.trigger_name = trigger.name().to_string();
    alert.severity = trigger.severity().to_string();
}

fn mark_error(alert: &mut Alert, error: &str, now: DateTime<Utc>) {
    alert.state = AlertState::Error;
    alert.error_message = Some(error.to_string());
    alert.push_error_history(AlertError { timestamp: now, message: error.to_string() });
}

fn mark_completed(alert: &mut Alert, now: DateTime<Utc>) {
    alert.state = AlertState::Completed;
    alert.end_time = Some(now);
    alert.error_message = None;
}

/// Merges this run's action results into an alert's bookkeeping.
///
/// A throttled run increments `throttled_count`; a successful send sets
/// `last_execution_time`. Nothing is ever reset, and entries of actions
/// that did not run this time are kept.
pub fn update_action_results(
    existing: &[ActionExecutionResult],
    run: &[ActionRunResult],
) -> Vec<ActionExecutionResult> {
    let mut merged = existing.to_vec();

    for result in run {
        let index = match merged.iter().position(|r| r.action_id == result.action_id) {
            Some(index) => index,
            None => {
                merged.push(ActionExecutionResult {
                    action_id: result.action_id.clone(),
                    last_execution_time: None,
                    throttled_count: 0,
                });
                merged.len() - 1
            }
        };
        let entry = &mut merged[index];

        if result.throttled {
            entry.throttled_count += 1;
        } else if let Some(executed) = result.execution_time {
            entry.last_execution_time = Some(executed);
        }
    }

    merged
}

/// Reconciles the single alert of a query-level trigger.
///
/// `existing` is the non-completed alert of the trigger, if any.
pub fn compose_query_level_alert(
    monitor: &Monitor,
    trigger: &Trigger,
    existing: Option<&Alert>,
    triggered: bool,
    error: Option<&str>,
    action_results: &[ActionRunResult],
    now: DateTime<Utc>,
) -> AlertUpdate {
    let existing = existing.filter(|a| a.state != AlertState::Completed);

    match (existing, triggered, error) {
        (None, false, None) => AlertUpdate::NoChange,
        (Some(current), false, None) => {
            let mut alert = current.clone();
            refresh_metadata(&mut alert, monitor, trigger);
            mark_completed(&mut alert, now);
            alert.action_execution_results =
                update_action_results(&current.action_execution_results, action_results);
            AlertUpdate::Complete { alert, expected_version: current.version }
        }
        (Some(current), true, None) if current.is_acknowledged() => AlertUpdate::NoChange,
        (Some(current), _, error) => {
            let mut alert = current.clone();
            refresh_metadata(&mut alert, monitor, trigger);
            alert.last_notification_time = Some(now);
            alert.action_execution_results =
                update_action_results(&current.action_execution_results, action_results);
            match error {
                Some(error) => mark_error(&mut alert, error, now),
                None => {
                    alert.state = AlertState::Active;
                    alert.error_message = None;
                }
            }
            AlertUpdate::Upsert { alert, expected_version: current.version }
        }
        (None, _, error) => {
            let mut alert = new_alert(monitor, trigger, AlertState::Active, now);
            alert.action_execution_results = update_action_results(&[], action_results);
            if let Some(error) = error {
                mark_error(&mut alert, error, now);
            }
            AlertUpdate::Upsert { alert, expected_version: 0 }
        }
    }
}

/// One alert of a bucket-level trigger run, before it is reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAlertPlan {
    /// Bucket key hash. Empty for the bucketless error alert.
    pub hash: String,
    /// NEW, DEDUPED or COMPLETED. `None` for alerts put into ERROR without a
    /// matching bucket.
    pub category: Option<AlertCategory>,
    /// The persisted alert.
    pub existing: Option<Alert>,
    /// The matched bucket.
    pub bucket: Option<AggregationResultBucket>,
}

impl BucketAlertPlan {
    /// Whether actions may run for this alert.
    pub fn is_actionable(&self, errors: &RunErrors) -> bool {
        if errors.blocks_dispatch() {
            return false;
        }
        match self.category {
            Some(AlertCategory::Deduped) =>
                !self.existing.as_ref().is_some_and(Alert::is_acknowledged),
            Some(_) => true,
            None => false,
        }
    }
}

/// Labels every alert of a bucket-level trigger run.
///
/// Matched buckets without an alert are NEW, matched buckets with one are
/// DEDUPED, and alerts whose bucket no longer matches are COMPLETED. When
/// the run failed, unmatched alerts are left uncategorized (they go to
/// ERROR) and, if nothing else can carry the error, a bucketless plan is
/// added for it.
pub fn categorize_bucket_alerts(
    current_alerts: Vec<Alert>,
    matched: &BTreeMap<String, AggregationResultBucket>,
    has_error: bool,
) -> Vec<BucketAlertPlan> {
    let mut by_hash: HashMap<String, Alert> = HashMap::new();
    let mut unmatched_order = Vec::new();
    for alert in current_alerts.into_iter().filter(|a| a.state != AlertState::Completed) {
        let hash = alert.bucket_keys_hash().unwrap_or_default();
        unmatched_order.push(hash.clone());
        if let Some(previous) = by_hash.insert(hash.clone(), alert) {
            tracing::warn!(alert_id = %previous.id, bucket = %hash, "Duplicate alert for bucket, ignoring the older one.");
        }
    }

    let mut plans = Vec::with_capacity(matched.len() + by_hash.len());
    for (hash, bucket) in matched {
        let existing = by_hash.remove(hash);
        plans.push(BucketAlertPlan {
            hash: hash.clone(),
            category: Some(if existing.is_some() {
                AlertCategory::Deduped
            } else {
                AlertCategory::New
            }),
            existing,
            bucket: Some(bucket.clone()),
        });
    }

    for hash in unmatched_order {
        if let Some(alert) = by_hash.remove(&hash) {
            plans.push(BucketAlertPlan {
                hash,
                category: (!has_error).then_some(AlertCategory::Completed),
                existing: Some(alert),
                bucket: None,
            });
        }
    }

    if has_error && plans.is_empty() {
        plans.push(BucketAlertPlan {
            hash: String::new(),
            category: None,
            existing: None,
            bucket: None,
        });
    }

    plans
}

/// Reconciles one alert of a bucket-level trigger.
pub fn compose_bucket_level_alert(
    monitor: &Monitor,
    trigger: &Trigger,
    existing: Option<&Alert>,
    bucket: Option<&AggregationResultBucket>,
    error: Option<&str>,
    action_results: &[ActionRunResult],
    now: DateTime<Utc>,
) -> AlertUpdate {
    let existing = existing.filter(|a| a.state != AlertState::Completed);

    let mut update = compose_query_level_alert(
        monitor,
        trigger,
        existing,
        bucket.is_some(),
        error,
        action_results,
        now,
    );

    if let AlertUpdate::Upsert { alert, .. } = &mut update {
        if let Some(bucket) = bucket {
            alert.agg_alert_content = Some(bucket.clone());
        }
    }
    update
}

/// Outcome of an acknowledge request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AcknowledgeResult {
    /// Alerts moved to ACKNOWLEDGED.
    pub acknowledged: Vec<String>,
    /// Alerts that exist but could not be acknowledged.
    pub failed: Vec<String>,
    /// Ids without a non-completed alert of the monitor.
    pub missing: Vec<String>,
}

/// Acknowledges ACTIVE alerts of a monitor.
///
/// Alerts in any other state are reported as failed, as are alerts that
/// changed concurrently.
#[tracing::instrument(skip(store, alert_ids), level = "debug")]
pub async fn acknowledge_alerts(
    store: &dyn AlertStore,
    monitor_id: &str,
    alert_ids: &[String],
    now: DateTime<Utc>,
) -> Result<AcknowledgeResult, PersistenceError> {
    let mut result = AcknowledgeResult::default();

    for id in alert_ids {
        let Some(mut alert) = store.get_alert(id).await?.filter(|a| a.monitor_id == monitor_id)
        else {
            result.missing.push(id.clone());
            continue;
        };

        if alert.state != AlertState::Active {
            result.failed.push(id.clone());
            continue;
        }

        let expected_version = alert.version;
        alert.state = AlertState::Acknowledged;
        alert.acknowledged_time = Some(now);

        match store.put_alert(&alert, expected_version).await {
            Ok(_) => result.acknowledged.push(id.clone()),
            Err(PersistenceError::VersionConflict { .. }) => result.failed.push(id.clone()),
            Err(e) => return Err(e),
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::Map;

    use super::*;
    use crate::{
        persistence::MockAlertStore,
        test_helpers::{AlertBuilder, MonitorBuilder},
    };

    fn fixture() -> (Monitor, Trigger) {
        let monitor = MonitorBuilder::new().id("m1").build();
        let trigger = monitor.triggers[0].clone();
        (monitor, trigger)
    }

    fn bucket(keys: &[&str]) -> AggregationResultBucket {
        AggregationResultBucket {
            parent_bucket_path: "by_host".into(),
            bucket_keys: keys.iter().map(|k| k.to_string()).collect(),
            bucket: Map::new(),
        }
    }

    fn existing(trigger: &Trigger, state: AlertState) -> Alert {
        AlertBuilder::new("m1", trigger.id()).id("a1").version(3).state(state).build()
    }

    #[test]
    fn test_error_precedence() {
        let errors = RunErrors {
            input: Some("timeout".into()),
            evaluation: Some("bad".into()),
            action: Some("down".into()),
        };
        assert_eq!(errors.alert_error().unwrap(), "Error fetching inputs:\ntimeout");

        let errors = RunErrors { input: None, ..errors };
        assert_eq!(errors.alert_error().unwrap(), "Failed evaluating trigger:\nbad");

        let errors = RunErrors { evaluation: None, ..errors };
        assert_eq!(errors.alert_error().unwrap(), "Failed running action:\ndown");
        assert!(!errors.blocks_dispatch());

        assert!(RunErrors::default().alert_error().is_none());
    }

    #[test]
    fn test_triggered_without_alert_creates_active() {
        let (monitor, trigger) = fixture();
        let now = Utc::now();

        let update = compose_query_level_alert(&monitor, &trigger, None, true, None, &[], now);

        let AlertUpdate::Upsert { alert, expected_version } = update else {
            panic!("expected upsert");
        };
        assert_eq!(expected_version, 0);
        assert_eq!(alert.state, AlertState::Active);
        assert_eq!(alert.start_time, now);
        assert_eq!(alert.monitor_id, "m1");
        assert!(!alert.id.is_empty());
    }

    #[test]
    fn test_not_triggered_without_alert_is_no_change() {
        let (monitor, trigger) = fixture();
        let update = compose_query_level_alert(&monitor, &trigger, None, false, None, &[], Utc::now());
        assert_eq!(update, AlertUpdate::NoChange);
    }

    #[test]
    fn test_acknowledged_and_triggered_is_no_change() {
        let (monitor, trigger) = fixture();
        let current = existing(&trigger, AlertState::Acknowledged);
        let update =
            compose_query_level_alert(&monitor, &trigger, Some(&current), true, None, &[], Utc::now());
        assert_eq!(update, AlertUpdate::NoChange);
    }

    #[test]
    fn test_error_moves_existing_alert_to_error() {
        let (monitor, trigger) = fixture();
        let current = existing(&trigger, AlertState::Acknowledged);
        let now = Utc::now();

        let update = compose_query_level_alert(
            &monitor,
            &trigger,
            Some(&current),
            false,
            Some("Failed evaluating trigger:\nboom"),
            &[],
            now,
        );

        let AlertUpdate::Upsert { alert, expected_version } = update else {
            panic!("expected upsert");
        };
        assert_eq!(expected_version, 3);
        assert_eq!(alert.id, "a1");
        assert_eq!(alert.state, AlertState::Error);
        assert_eq!(alert.error_message.as_deref(), Some("Failed evaluating trigger:\nboom"));
        assert_eq!(alert.error_history.len(), 1);
        assert_eq!(alert.error_history[0].timestamp, now);
    }

    #[test]
    fn test_error_without_alert_creates_error_alert() {
        let (monitor, trigger) = fixture();
        let update =
            compose_query_level_alert(&monitor, &trigger, None, false, Some("x"), &[], Utc::now());
        let alert = update.alert().unwrap();
        assert_eq!(alert.state, AlertState::Error);
        assert_eq!(alert.error_message.as_deref(), Some("x"));
    }

    #[test]
    fn test_completion_keeps_history_and_clears_message() {
        let (monitor, trigger) = fixture();
        let mut current = existing(&trigger, AlertState::Error);
        let now = Utc::now();
        current.error_message = Some("old".into());
        current.push_error_history(AlertError { timestamp: now, message: "old".into() });

        let update =
            compose_query_level_alert(&monitor, &trigger, Some(&current), false, None, &[], now);

        let AlertUpdate::Complete { alert, expected_version } = update else {
            panic!("expected completion");
        };
        assert_eq!(expected_version, 3);
        assert_eq!(alert.state, AlertState::Completed);
        assert_eq!(alert.end_time, Some(now));
        assert!(alert.error_message.is_none());
        assert_eq!(alert.error_history.last().unwrap().message, "old");
    }

    #[test]
    fn test_recovery_from_error_goes_back_to_active() {
        let (monitor, trigger) = fixture();
        let mut current = existing(&trigger, AlertState::Error);
        current.error_message = Some("old".into());

        let update =
            compose_query_level_alert(&monitor, &trigger, Some(&current), true, None, &[], Utc::now());
        let alert = update.alert().unwrap();
        assert_eq!(alert.state, AlertState::Active);
        assert!(alert.error_message.is_none());
    }

    #[test]
    fn test_update_action_results() {
        let now = Utc::now();
        let earlier = now - Duration::minutes(3);
        let existing = vec![
            ActionExecutionResult {
                action_id: "throttled".into(),
                last_execution_time: Some(earlier),
                throttled_count: 1,
            },
            ActionExecutionResult {
                action_id: "idle".into(),
                last_execution_time: Some(earlier),
                throttled_count: 4,
            },
        ];
        let run = vec![
            ActionRunResult { action_id: "throttled".into(), throttled: true, ..Default::default() },
            ActionRunResult {
                action_id: "fresh".into(),
                execution_time: Some(now),
                ..Default::default()
            },
            ActionRunResult {
                action_id: "failed".into(),
                error: Some("down".into()),
                ..Default::default()
            },
        ];

        let merged = update_action_results(&existing, &run);

        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].throttled_count, 2);
        assert_eq!(merged[0].last_execution_time, Some(earlier));
        assert_eq!(merged[1], existing[1]);
        assert_eq!(merged[2].last_execution_time, Some(now));
        assert_eq!(merged[2].throttled_count, 0);
        assert_eq!(merged[3].last_execution_time, None);
    }

    #[test]
    fn test_categorize_new_deduped_completed() {
        let ongoing = AlertBuilder::new("m1", "t1").id("ongoing").bucket(&["a"]).build();
        let resolved = AlertBuilder::new("m1", "t1").id("resolved").bucket(&["b"]).build();
        let matched = BTreeMap::from([
            ("a".to_string(), bucket(&["a"])),
            ("c".to_string(), bucket(&["c"])),
        ]);

        let plans = categorize_bucket_alerts(vec![ongoing, resolved], &matched, false);

        let summary: Vec<_> = plans
            .iter()
            .map(|p| (p.hash.as_str(), p.category, p.existing.as_ref().map(|a| a.id.as_str())))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", Some(AlertCategory::Deduped), Some("ongoing")),
                ("c", Some(AlertCategory::New), None),
                ("b", Some(AlertCategory::Completed), Some("resolved")),
            ]
        );
    }

    #[test]
    fn test_categorize_with_error() {
        let current = AlertBuilder::new("m1", "t1").id("x").bucket(&["b"]).build();
        let plans = categorize_bucket_alerts(vec![current], &BTreeMap::new(), true);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].category, None);

        let plans = categorize_bucket_alerts(vec![], &BTreeMap::new(), true);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].hash, "");
        assert!(plans[0].existing.is_none());
    }

    #[test]
    fn test_acknowledged_deduped_is_not_actionable() {
        let acked = AlertBuilder::new("m1", "t1")
            .bucket(&["a"])
            .state(AlertState::Acknowledged)
            .build();
        let matched = BTreeMap::from([("a".to_string(), bucket(&["a"]))]);
        let plans = categorize_bucket_alerts(vec![acked], &matched, false);

        assert!(!plans[0].is_actionable(&RunErrors::default()));
    }

    #[test]
    fn test_bucket_alert_carries_latest_bucket() {
        let (monitor, trigger) = fixture();
        let current = AlertBuilder::new("m1", trigger.id()).bucket(&["a"]).build();
        let mut latest = bucket(&["a"]);
        latest.bucket.insert("doc_count".into(), 9.into());

        let update = compose_bucket_level_alert(
            &monitor,
            &trigger,
            Some(&current),
            Some(&latest),
            None,
            &[],
            Utc::now(),
        );
        assert_eq!(update.alert().unwrap().agg_alert_content, Some(latest));
    }

    #[tokio::test]
    async fn test_acknowledge_alerts() {
        let mut store = MockAlertStore::new();
        store.expect_get_alert().returning(|id| {
            Ok(match id {
                "active" => Some(AlertBuilder::new("m1", "t1").id("active").version(2).build()),
                "errored" => Some(
                    AlertBuilder::new("m1", "t1").id("errored").state(AlertState::Error).build(),
                ),
                "other-monitor" => Some(AlertBuilder::new("m2", "t1").id("other-monitor").build()),
                _ => None,
            })
        });
        store
            .expect_put_alert()
            .withf(|alert, expected| {
                alert.id == "active" && *expected == 2 && alert.state == AlertState::Acknowledged
            })
            .times(1)
            .returning(|_, _| Ok(3));

        let ids: Vec<String> =
            ["active", "errored", "other-monitor", "gone"].iter().map(|s| s.to_string()).collect();
        let result = acknowledge_alerts(&store, "m1", &ids, Utc::now()).await.unwrap();

        assert_eq!(result.acknowledged, vec!["active"]);
        assert_eq!(result.failed, vec!["errored"]);
        assert_eq!(result.missing, vec!["other-monitor", "gone"]);
    }
}
