//! Runs trigger actions: execution policy, throttling, rendering and
//! delivery.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use super::alert_reconciler::{BucketAlertPlan, RunErrors};
use crate::{
    models::{
        action::{Action, ActionExecutionScope, AlertCategory},
        alert::Alert,
        notification::NotificationMessage,
        run_result::ActionRunResult,
    },
    notification::{FailureClass, NotificationTransport, TemplateService},
};

/// Executes actions through a [`NotificationTransport`].
pub struct ActionDispatcher {
    transport: Arc<dyn NotificationTransport>,
    templates: Arc<TemplateService>,
    escalating_failures: HashSet<FailureClass>,
}

impl ActionDispatcher {
    /// Creates a dispatcher. Failures of a class in `escalating_failures`
    /// put the alert into ERROR.
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        templates: Arc<TemplateService>,
        escalating_failures: &[FailureClass],
    ) -> Self {
        Self { transport, templates, escalating_failures: escalating_failures.iter().copied().collect() }
    }

    /// Whether the action already ran for `alert` within its throttle period.
    pub fn is_throttled(action: &Action, alert: Option<&Alert>, now: DateTime<Utc>) -> bool {
        let Some(period) = action.throttle_period() else {
            return false;
        };
        let Some(last) = alert
            .and_then(|a| a.action_result(&action.id))
            .and_then(|r| r.last_execution_time)
        else {
            return false;
        };
        // A period reaching past the earliest representable time never expires.
        now.checked_sub_signed(period).is_none_or(|since| last > since)
    }

    /// The first failure among `results` whose class escalates, as text.
    pub fn escalation<'a>(
        &self,
        results: impl IntoIterator<Item = &'a ActionRunResult>,
    ) -> Option<String> {
        results.into_iter().find_map(|r| match (&r.error, r.failure_class) {
            (Some(error), Some(class)) if self.escalating_failures.contains(&class) =>
                Some(error.clone()),
            _ => None,
        })
    }

    /// Runs a single action for `alert`.
    ///
    /// In a dry run the message is rendered but not sent.
    #[tracing::instrument(skip_all, fields(action_id = %action.id), level = "debug")]
    pub async fn run_action(
        &self,
        action: &Action,
        context: &Map<String, Value>,
        alert: Option<&Alert>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> ActionRunResult {
        let mut result = ActionRunResult {
            action_id: action.id.clone(),
            action_name: action.name.clone(),
            ..Default::default()
        };

        if Self::is_throttled(action, alert, now) {
            tracing::debug!("Action throttled.");
            result.throttled = true;
            return result;
        }

        let message = match self.render(action, context) {
            Ok(message) => message,
            Err(e) => {
                result.error = Some(e.to_string());
                result.failure_class = Some(FailureClass::Render);
                return result;
            }
        };
        result.output.insert("subject".into(), message.title.clone());
        result.output.insert("message".into(), message.body.clone());

        if dry_run {
            return result;
        }

        match self.transport.send(&action.destination_id, &message).await {
            Ok(_) => result.execution_time = Some(now),
            Err(e) => {
                tracing::warn!(
                    destination_id = %action.destination_id,
                    error = %e,
                    "Action failed."
                );
                result.failure_class = Some(e.failure_class());
                result.error = Some(e.to_string());
            }
        }
        result
    }

    fn render(
        &self,
        action: &Action,
        context: &Map<String, Value>,
    ) -> Result<NotificationMessage, crate::notification::TemplateServiceError> {
        let mut template_context = context.clone();
        template_context.insert("ctx".into(), Value::Object(context.clone()));

        let subject = match &action.subject_template {
            Some(template) => self.templates.render(template, &template_context)?,
            None => String::new(),
        };
        let body = self.templates.render(&action.message_template, &template_context)?;
        Ok(NotificationMessage::new(subject, body))
    }

    /// Runs the actions of a query-level trigger for one alert.
    ///
    /// Query-level actions have no execution policy; loading rejects one.
    pub async fn run_query_level_actions(
        &self,
        actions: &[Action],
        context: &Map<String, Value>,
        alert: Option<&Alert>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, ActionRunResult> {
        let mut results = BTreeMap::new();
        for action in actions {
            let result = self.run_action(action, context, alert, dry_run, now).await;
            results.insert(action.id.clone(), result);
        }
        results
    }

    /// Runs the actions of a bucket-level trigger over the categorized
    /// alerts of the run.
    ///
    /// Per-alert actions run once for every actionable alert whose category
    /// the policy covers. Per-execution actions run once when at least one
    /// alert is actionable, and the result is recorded under every
    /// actionable alert. Results are keyed by bucket hash, then action id.
    pub async fn run_bucket_level_actions(
        &self,
        actions: &[Action],
        plans: &[BucketAlertPlan],
        errors: &RunErrors,
        base_context: &Map<String, Value>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, BTreeMap<String, ActionRunResult>> {
        let actionable: Vec<&BucketAlertPlan> =
            plans.iter().filter(|p| p.is_actionable(errors)).collect();

        let mut results: BTreeMap<String, BTreeMap<String, ActionRunResult>> = BTreeMap::new();
        if actionable.is_empty() {
            return results;
        }

        for action in actions {
            let policy = action.bucket_level_policy();

            match &policy.action_execution_scope {
                ActionExecutionScope::PerExecution => {
                    let context = execution_context(base_context, &actionable);
                    let result = self.run_action(action, &context, None, dry_run, now).await;
                    for plan in &actionable {
                        results
                            .entry(plan.hash.clone())
                            .or_default()
                            .insert(action.id.clone(), result.clone());
                    }
                }
                ActionExecutionScope::PerAlert { .. } => {
                    for plan in &actionable {
                        let Some(category) = plan.category else {
                            continue;
                        };
                        if !policy.covers(category) {
                            continue;
                        }
                        let context = alert_context(base_context, plan, category);
                        let result = self
                            .run_action(action, &context, plan.existing.as_ref(), dry_run, now)
                            .await;
                        results
                            .entry(plan.hash.clone())
                            .or_default()
                            .insert(action.id.clone(), result);
                    }
                }
            }
        }

        results
    }
}

fn bucket_summary(plan: &BucketAlertPlan) -> Value {
    let bucket = plan.bucket.as_ref().or_else(|| {
        plan.existing.as_ref().and_then(|a| a.agg_alert_content.as_ref())
    });
    json!({
        "id": plan.existing.as_ref().map(|a| a.id.clone()),
        "bucket_keys": bucket.map(|b| b.bucket_keys.clone()).unwrap_or_default(),
        "parent_bucket_path": bucket.map(|b| b.parent_bucket_path.clone()),
        "agg_alert_content": bucket.map(|b| Value::Object(b.bucket.clone())),
    })
}

fn alert_context(
    base: &Map<String, Value>,
    plan: &BucketAlertPlan,
    category: AlertCategory,
) -> Map<String, Value> {
    let mut context = base.clone();
    let mut alert = bucket_summary(plan);
    alert["category"] = json!(category);
    context.insert("alert".into(), alert);
    context
}

fn execution_context(base: &Map<String, Value>, actionable: &[&BucketAlertPlan]) -> Map<String, Value> {
    let by_category = |category: AlertCategory| {
        Value::Array(
            actionable
                .iter()
                .filter(|p| p.category == Some(category))
                .map(|p| bucket_summary(p))
                .collect(),
        )
    };

    let mut context = base.clone();
    context.insert("newAlerts".into(), by_category(AlertCategory::New));
    context.insert("dedupedAlerts".into(), by_category(AlertCategory::Deduped));
    context.insert("completedAlerts".into(), by_category(AlertCategory::Completed));
    context
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mockall::predicate::eq;

    use super::*;
    use crate::{
        models::{
            action::{ActionExecutionPolicy, Throttle, ThrottleUnit},
            alert::{ActionExecutionResult, AggregationResultBucket},
        },
        notification::{MockNotificationTransport, NotificationError},
        test_helpers::{ActionBuilder, AlertBuilder},
    };

    fn dispatcher(transport: MockNotificationTransport) -> ActionDispatcher {
        ActionDispatcher::new(
            Arc::new(transport),
            Arc::new(TemplateService::new()),
            &[FailureClass::Unreachable],
        )
    }

    fn context() -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("monitor".into(), json!({ "name": "cpu" }));
        context
    }

    fn plan(hash: &str, category: AlertCategory, existing: Option<Alert>) -> BucketAlertPlan {
        BucketAlertPlan {
            hash: hash.into(),
            category: Some(category),
            existing,
            bucket: Some(AggregationResultBucket {
                parent_bucket_path: "by_host".into(),
                bucket_keys: vec![hash.into()],
                bucket: Map::new(),
            }),
        }
    }

    #[tokio::test]
    async fn test_successful_send_records_execution_time() {
        let mut transport = MockNotificationTransport::new();
        transport
            .expect_send()
            .with(eq("dest"), eq(NotificationMessage::new("cpu fired", "monitor cpu")))
            .times(1)
            .returning(|_, _| Ok("ok".into()));

        let mut action = ActionBuilder::new("notify").build();
        action.destination_id = "dest".into();
        action.subject_template = Some("{{ ctx.monitor.name }} fired".into());
        action.message_template = "monitor {{ monitor.name }}".into();

        let now = Utc::now();
        let result = dispatcher(transport).run_action(&action, &context(), None, false, now).await;

        assert_eq!(result.execution_time, Some(now));
        assert!(result.error.is_none());
        assert!(!result.throttled);
        assert_eq!(result.output["subject"], "cpu fired");
    }

    #[tokio::test]
    async fn test_throttle_suppresses_send() {
        let mut transport = MockNotificationTransport::new();
        transport.expect_send().never();

        let action = ActionBuilder::new("notify").throttle(Throttle::minutes(10)).build();
        let now = Utc::now();
        let mut alert = AlertBuilder::new("m", "t").build();
        alert.action_execution_results.push(ActionExecutionResult {
            action_id: action.id.clone(),
            last_execution_time: Some(now - Duration::minutes(5)),
            throttled_count: 0,
        });

        let result =
            dispatcher(transport).run_action(&action, &context(), Some(&alert), false, now).await;
        assert!(result.throttled);
        assert!(result.execution_time.is_none());
    }

    #[test]
    fn test_throttle_window_boundaries() {
        let action = ActionBuilder::new("notify").throttle(Throttle::minutes(10)).build();
        let now = Utc::now();
        let alert_at = |last: DateTime<Utc>| {
            let mut alert = AlertBuilder::new("m", "t").build();
            alert.action_execution_results.push(ActionExecutionResult {
                action_id: action.id.clone(),
                last_execution_time: Some(last),
                throttled_count: 0,
            });
            alert
        };

        assert!(!ActionDispatcher::is_throttled(&action, None, now));
        assert!(ActionDispatcher::is_throttled(&action, Some(&alert_at(now - Duration::minutes(9))), now));
        assert!(!ActionDispatcher::is_throttled(&action, Some(&alert_at(now - Duration::minutes(10))), now));

        let mut unthrottled = action.clone();
        unthrottled.throttle_enabled = false;
        assert!(!ActionDispatcher::is_throttled(
            &unthrottled,
            Some(&alert_at(now - Duration::minutes(1))),
            now
        ));
    }

    #[test]
    fn test_throttle_beyond_calendar_range_stays_throttled() {
        let action = ActionBuilder::new("notify")
            .throttle(Throttle { value: u32::MAX, unit: ThrottleUnit::Days })
            .build();
        let now = Utc::now();
        let mut alert = AlertBuilder::new("m", "t").build();
        alert.action_execution_results.push(ActionExecutionResult {
            action_id: action.id.clone(),
            last_execution_time: Some(now),
            throttled_count: 0,
        });

        assert!(ActionDispatcher::is_throttled(&action, Some(&alert), now));
        assert!(!ActionDispatcher::is_throttled(&action, None, now));
    }

    #[tokio::test]
    async fn test_failure_is_classified_and_escalated() {
        let mut transport = MockNotificationTransport::new();
        transport
            .expect_send()
            .returning(|_, _| Err(NotificationError::ServerError { status: 503 }));
        let dispatcher = dispatcher(transport);

        let action = ActionBuilder::new("notify").build();
        let result = dispatcher.run_action(&action, &context(), None, false, Utc::now()).await;

        assert_eq!(result.failure_class, Some(FailureClass::Unreachable));
        assert_eq!(result.error.as_deref(), Some("Destination returned status 503"));
        assert_eq!(
            dispatcher.escalation([&result]).as_deref(),
            Some("Destination returned status 503")
        );

        let rejected = ActionRunResult {
            error: Some("nope".into()),
            failure_class: Some(FailureClass::Rejected),
            ..Default::default()
        };
        assert!(dispatcher.escalation([&rejected]).is_none());
    }

    #[tokio::test]
    async fn test_render_failure_does_not_send() {
        let mut transport = MockNotificationTransport::new();
        transport.expect_send().never();

        let mut action = ActionBuilder::new("notify").build();
        action.message_template = "{{ unclosed".into();

        let result =
            dispatcher(transport).run_action(&action, &context(), None, false, Utc::now()).await;
        assert_eq!(result.failure_class, Some(FailureClass::Render));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_dry_run_renders_without_sending() {
        let mut transport = MockNotificationTransport::new();
        transport.expect_send().never();

        let action = ActionBuilder::new("notify").build();
        let result =
            dispatcher(transport).run_action(&action, &context(), None, true, Utc::now()).await;

        assert!(result.error.is_none());
        assert!(result.execution_time.is_none());
        assert!(result.output.contains_key("message"));
    }

    #[tokio::test]
    async fn test_per_alert_policy_filters_categories() {
        let mut transport = MockNotificationTransport::new();
        transport.expect_send().times(1).returning(|_, _| Ok(String::new()));

        let action = ActionBuilder::new("on-complete").per_alert(&[AlertCategory::Completed]).build();
        let completed = AlertBuilder::new("m", "t").id("done").bucket(&["b"]).build();
        let plans = vec![
            plan("a", AlertCategory::New, None),
            BucketAlertPlan { bucket: None, ..plan("b", AlertCategory::Completed, Some(completed)) },
        ];

        let results = dispatcher(transport)
            .run_bucket_level_actions(
                &[action.clone()],
                &plans,
                &RunErrors::default(),
                &context(),
                false,
                Utc::now(),
            )
            .await;

        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(results["b"][&action.id].execution_time.is_some());
    }

    #[tokio::test]
    async fn test_per_execution_runs_once_and_records_under_every_alert() {
        let mut transport = MockNotificationTransport::new();
        transport.expect_send().times(1).returning(|_, _| Ok(String::new()));

        let mut action = ActionBuilder::new("summary").build();
        action.action_execution_policy = Some(ActionExecutionPolicy {
            action_execution_scope: ActionExecutionScope::PerExecution,
        });
        action.message_template = "{{ ctx.newAlerts | length }} new".into();

        let plans = vec![plan("a", AlertCategory::New, None), plan("c", AlertCategory::New, None)];
        let results = dispatcher(transport)
            .run_bucket_level_actions(
                &[action.clone()],
                &plans,
                &RunErrors::default(),
                &context(),
                false,
                Utc::now(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results["a"][&action.id], results["c"][&action.id]);
        assert_eq!(results["a"][&action.id].output["message"], "2 new");
    }

    #[tokio::test]
    async fn test_input_error_blocks_bucket_actions() {
        let mut transport = MockNotificationTransport::new();
        transport.expect_send().never();

        let errors = RunErrors { input: Some("down".into()), ..Default::default() };
        let results = dispatcher(transport)
            .run_bucket_level_actions(
                &[ActionBuilder::new("notify").build()],
                &[plan("a", AlertCategory::New, None)],
                &errors,
                &context(),
                false,
                Utc::now(),
            )
            .await;
        assert!(results.is_empty());
    }
}
