//! Runs a monitor end to end: inputs, triggers, actions and alert writes.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::future::join_all;
use serde_json::Value;

use super::{
    action_dispatcher::ActionDispatcher,
    alert_reconciler::{
        AlertUpdate, RunErrors, categorize_bucket_alerts, compose_bucket_level_alert,
        compose_query_level_alert,
    },
    input::{InputExecutor, collect_input_results, find_after_key, rewrite_query_with_after_key},
    rhai::ExpressionEvaluator,
    trigger_evaluator::{TriggerEvaluator, trigger_context},
};
use crate::{
    models::{
        alert::Alert,
        monitor::{Input, Monitor, MonitorType},
        run_result::{
            ActionRunResult, BucketLevelTriggerRunResult, InputRunResults, MonitorRunResult,
            PeriodWindow, QueryLevelTriggerRunResult, TriggerRunResult,
        },
        trigger::{BucketLevelTrigger, QueryLevelTrigger, Trigger},
    },
    persistence::{AlertStore, PersistenceError},
};

/// Executes monitor runs.
///
/// Alert timestamps of a run are taken from the window's `period_end`,
/// which is the invocation time for scheduled runs.
pub struct MonitorRunner {
    input_executor: Arc<dyn InputExecutor>,
    trigger_evaluator: TriggerEvaluator,
    dispatcher: ActionDispatcher,
    store: Arc<dyn AlertStore>,
    max_bucket_pages: u32,
}

/// The outcome of one trigger within a run.
struct TriggerOutcome {
    trigger_id: String,
    result: TriggerRunResult,
    errors: Vec<String>,
}

impl MonitorRunner {
    /// Creates a new runner.
    pub fn new(
        input_executor: Arc<dyn InputExecutor>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        dispatcher: ActionDispatcher,
        store: Arc<dyn AlertStore>,
        max_bucket_pages: u32,
    ) -> Self {
        Self {
            input_executor,
            trigger_evaluator: TriggerEvaluator::new(evaluator),
            dispatcher,
            store,
            max_bucket_pages: max_bucket_pages.max(1),
        }
    }

    /// Runs `monitor` over `window`.
    ///
    /// A dry run reads current alerts and renders action messages, but
    /// sends nothing and writes nothing.
    #[tracing::instrument(skip_all, fields(monitor_id = %monitor.id, dry_run))]
    pub async fn run_monitor(
        &self,
        monitor: &Monitor,
        window: PeriodWindow,
        dry_run: bool,
    ) -> MonitorRunResult {
        let mut result = MonitorRunResult::new(&monitor.name, &window);

        match monitor.monitor_type {
            MonitorType::DocLevel => {
                result.push_error("Doc-level monitors are not supported by this runner");
            }
            MonitorType::BucketLevel => {
                self.run_bucket_level_monitor(monitor, &window, dry_run, &mut result).await;
            }
            MonitorType::QueryLevel | MonitorType::ClusterMetrics => {
                self.run_query_level_monitor(monitor, &window, dry_run, &mut result).await;
            }
        }

        match &result.error {
            Some(error) => tracing::warn!(%error, "Monitor run finished with errors."),
            None => tracing::debug!(triggers = result.trigger_results.len(), "Monitor run finished."),
        }
        result
    }

    /// Runs `monitor` with a deadline. On expiry the result carries an
    /// error. Alerts written before the deadline stay written.
    pub async fn run_monitor_with_timeout(
        &self,
        monitor: &Monitor,
        window: PeriodWindow,
        dry_run: bool,
        timeout: Duration,
    ) -> MonitorRunResult {
        match tokio::time::timeout(timeout, self.run_monitor(monitor, window, dry_run)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(monitor_id = %monitor.id, ?timeout, "Monitor run timed out.");
                let mut result = MonitorRunResult::new(&monitor.name, &window);
                result.push_error(format!("Monitor run timed out after {timeout:?}"));
                result
            }
        }
    }

    async fn run_query_level_monitor(
        &self,
        monitor: &Monitor,
        window: &PeriodWindow,
        dry_run: bool,
        result: &mut MonitorRunResult,
    ) {
        let inputs = collect_input_results(&*self.input_executor, &monitor.inputs, window).await;

        let outcomes = join_all(monitor.triggers.iter().map(|trigger| async {
            match trigger {
                Trigger::QueryLevel(query_level) =>
                    self.run_query_level_trigger(monitor, trigger, query_level, &inputs, window, dry_run)
                        .await,
                Trigger::BucketLevel(_) => TriggerOutcome {
                    trigger_id: trigger.id().to_string(),
                    result: TriggerRunResult::QueryLevel(QueryLevelTriggerRunResult {
                        trigger_name: trigger.name().to_string(),
                        ..Default::default()
                    }),
                    errors: vec![format!(
                        "Trigger '{}' is bucket-level but the monitor is not",
                        trigger.id()
                    )],
                },
            }
        }))
        .await;

        result.input_results = inputs;
        record_outcomes(result, outcomes);
    }

    async fn run_query_level_trigger(
        &self,
        monitor: &Monitor,
        trigger: &Trigger,
        query_level: &QueryLevelTrigger,
        inputs: &InputRunResults,
        window: &PeriodWindow,
        dry_run: bool,
    ) -> TriggerOutcome {
        let now = window.period_end;
        let mut outcome = TriggerOutcome {
            trigger_id: query_level.id.clone(),
            result: TriggerRunResult::QueryLevel(QueryLevelTriggerRunResult {
                trigger_name: query_level.name.clone(),
                ..Default::default()
            }),
            errors: Vec::new(),
        };

        let existing = match self.store.find_active_alerts(&monitor.id, &query_level.id).await {
            Ok(alerts) => {
                if alerts.len() > 1 {
                    tracing::warn!(
                        trigger_id = %query_level.id,
                        count = alerts.len(),
                        "More than one active alert for a query-level trigger, using the oldest."
                    );
                }
                alerts.into_iter().next()
            }
            Err(e) => {
                outcome.errors.push(format!("Failed to load alerts of trigger '{}': {e}", query_level.id));
                return outcome;
            }
        };

        let context = trigger_context(monitor, trigger, inputs, window, existing.as_ref());
        let mut run = self.trigger_evaluator.run_query_level(query_level, &context);

        let mut errors = RunErrors {
            input: inputs.error.clone(),
            evaluation: run.error.clone(),
            action: None,
        };

        let acknowledged = existing.as_ref().is_some_and(Alert::is_acknowledged);
        if run.triggered && !errors.blocks_dispatch() && !acknowledged {
            run.action_results = self
                .dispatcher
                .run_query_level_actions(&query_level.actions, &context, existing.as_ref(), dry_run, now)
                .await;
            errors.action = self.dispatcher.escalation(run.action_results.values());
        }

        let action_results: Vec<ActionRunResult> = run.action_results.values().cloned().collect();
        let alert_error = errors.alert_error();
        let compose = |current: Option<&Alert>| {
            compose_query_level_alert(
                monitor,
                trigger,
                current,
                run.triggered,
                alert_error.as_deref(),
                &action_results,
                now,
            )
        };

        if !dry_run {
            let update = compose(existing.as_ref());
            if let Err(e) = self.persist(update, compose).await {
                outcome.errors.push(e);
            }
        }

        outcome.result = TriggerRunResult::QueryLevel(run);
        outcome
    }

    async fn run_bucket_level_monitor(
        &self,
        monitor: &Monitor,
        window: &PeriodWindow,
        dry_run: bool,
        result: &mut MonitorRunResult,
    ) {
        let bucket_triggers: Vec<(&Trigger, &BucketLevelTrigger)> = monitor
            .triggers
            .iter()
            .filter_map(|t| match t {
                Trigger::BucketLevel(b) => Some((t, b)),
                Trigger::QueryLevel(_) => None,
            })
            .collect();
        if bucket_triggers.len() != monitor.triggers.len() {
            result.push_error("Query-level triggers are not evaluated on bucket-level monitors");
        }

        let mut trigger_results: BTreeMap<String, BucketLevelTriggerRunResult> = BTreeMap::new();
        let mut after_keys: BTreeMap<String, Value> = BTreeMap::new();
        let mut inputs = InputRunResults::default();
        let mut input_errors: Vec<String> = Vec::new();

        for page in 0..self.max_bucket_pages {
            let page_inputs = paged_inputs(&monitor.inputs, &after_keys);
            let page_results =
                collect_input_results(&*self.input_executor, &page_inputs, window).await;
            if let Some(error) = &page_results.error {
                input_errors.push(error.clone());
            }

            for (trigger, bucket_level) in &bucket_triggers {
                let context = trigger_context(monitor, trigger, &page_results, window, None);
                let current =
                    self.trigger_evaluator.run_bucket_level(bucket_level, &page_results, &context);
                let previous = trigger_results.remove(&bucket_level.id);
                trigger_results.insert(
                    bucket_level.id.clone(),
                    BucketLevelTriggerRunResult::combine(current, previous),
                );
            }

            after_keys = next_after_keys(&page_results, &bucket_triggers);
            inputs = page_results;

            if after_keys.is_empty() {
                break;
            }
            if page + 1 == self.max_bucket_pages {
                tracing::warn!(pages = self.max_bucket_pages, "Bucket paging limit reached.");
                result.push_error(format!(
                    "Stopped paging composite aggregations after {} pages",
                    self.max_bucket_pages
                ));
            }
        }

        if !input_errors.is_empty() {
            inputs.error = Some(input_errors.join("\n"));
        }

        let outcomes = join_all(bucket_triggers.iter().map(|(trigger, bucket_level)| {
            let trigger_result = trigger_results.remove(&bucket_level.id).unwrap_or_else(|| {
                BucketLevelTriggerRunResult {
                    trigger_name: bucket_level.name.clone(),
                    ..Default::default()
                }
            });
            self.run_bucket_level_trigger(
                monitor,
                trigger,
                bucket_level,
                trigger_result,
                &inputs,
                window,
                dry_run,
            )
        }))
        .await;

        result.input_results = inputs;
        record_outcomes(result, outcomes);
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_bucket_level_trigger(
        &self,
        monitor: &Monitor,
        trigger: &Trigger,
        bucket_level: &BucketLevelTrigger,
        mut trigger_result: BucketLevelTriggerRunResult,
        inputs: &InputRunResults,
        window: &PeriodWindow,
        dry_run: bool,
    ) -> TriggerOutcome {
        let now = window.period_end;
        let mut errors_out = Vec::new();

        let current = match self.store.find_active_alerts(&monitor.id, &bucket_level.id).await {
            Ok(alerts) => alerts,
            Err(e) => {
                errors_out.push(format!("Failed to load alerts of trigger '{}': {e}", bucket_level.id));
                return TriggerOutcome {
                    trigger_id: bucket_level.id.clone(),
                    result: TriggerRunResult::BucketLevel(trigger_result),
                    errors: errors_out,
                };
            }
        };

        let errors = RunErrors {
            input: inputs.error.clone(),
            evaluation: trigger_result.error.clone(),
            action: None,
        };
        let plans =
            categorize_bucket_alerts(current, &trigger_result.agg_result_buckets, errors.blocks_dispatch());

        let base_context = trigger_context(monitor, trigger, inputs, window, None);
        trigger_result.action_results = self
            .dispatcher
            .run_bucket_level_actions(&bucket_level.actions, &plans, &errors, &base_context, dry_run, now)
            .await;

        if !dry_run {
            for plan in &plans {
                let action_results: Vec<ActionRunResult> = trigger_result
                    .action_results
                    .get(&plan.hash)
                    .map(|results| results.values().cloned().collect())
                    .unwrap_or_default();
                let alert_errors = RunErrors {
                    action: self.dispatcher.escalation(&action_results),
                    ..errors.clone()
                };
                let alert_error = alert_errors.alert_error();

                let compose = |current: Option<&Alert>| {
                    compose_bucket_level_alert(
                        monitor,
                        trigger,
                        current,
                        plan.bucket.as_ref(),
                        alert_error.as_deref(),
                        &action_results,
                        now,
                    )
                };
                let update = compose(plan.existing.as_ref());
                if let Err(e) = self.persist(update, compose).await {
                    errors_out.push(e);
                }
            }
        }

        TriggerOutcome {
            trigger_id: bucket_level.id.clone(),
            result: TriggerRunResult::BucketLevel(trigger_result),
            errors: errors_out,
        }
    }

    /// Writes an update. On a version conflict the alert is read again and
    /// `recompose` is applied to the fresh copy once; a second failure is
    /// returned as a run-level error.
    async fn persist<F>(&self, update: AlertUpdate, recompose: F) -> Result<(), String>
    where
        F: Fn(Option<&Alert>) -> AlertUpdate,
    {
        let Some(alert_id) = update.alert().map(|a| a.id.clone()) else {
            return Ok(());
        };

        match self.write(&update).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                tracing::info!(%alert_id, "Alert changed concurrently, reconciling again.");
                let fresh = self
                    .store
                    .get_alert(&alert_id)
                    .await
                    .map_err(|e| format!("Failed to reload alert '{alert_id}': {e}"))?;
                self.write(&recompose(fresh.as_ref()))
                    .await
                    .map_err(|e| format!("Failed to save alert '{alert_id}' after retry: {e}"))
            }
            Err(e) => Err(format!("Failed to save alert '{alert_id}': {e}")),
        }
    }

    async fn write(&self, update: &AlertUpdate) -> Result<(), PersistenceError> {
        match update {
            AlertUpdate::NoChange => Ok(()),
            AlertUpdate::Upsert { alert, expected_version } => {
                self.store.put_alert(alert, *expected_version).await.map(|_| ())
            }
            AlertUpdate::Complete { alert, expected_version } => {
                self.store.complete_alert(alert, *expected_version).await.map(|_| ())
            }
        }
    }
}

fn record_outcomes(result: &mut MonitorRunResult, outcomes: Vec<TriggerOutcome>) {
    for outcome in outcomes {
        for error in outcome.errors {
            result.push_error(error);
        }
        result.trigger_results.insert(outcome.trigger_id, outcome.result);
    }
}

/// The monitor's inputs with each composite aggregation positioned after
/// the previous page.
fn paged_inputs(inputs: &[Input], after_keys: &BTreeMap<String, Value>) -> Vec<Input> {
    inputs
        .iter()
        .map(|input| {
            let mut input = input.clone();
            if let Input::Search(search) = &mut input {
                for (path, after_key) in after_keys {
                    let name = path.rsplit(['>', '.']).next().unwrap_or(path);
                    rewrite_query_with_after_key(&mut search.query, name, after_key);
                }
            }
            input
        })
        .collect()
}

fn next_after_keys(
    inputs: &InputRunResults,
    bucket_triggers: &[(&Trigger, &BucketLevelTrigger)],
) -> BTreeMap<String, Value> {
    let mut after_keys = BTreeMap::new();
    for (_, trigger) in bucket_triggers {
        let path = &trigger.condition.parent_bucket_path;
        if let Some(after_key) = inputs.results.iter().find_map(|r| find_after_key(r, path)) {
            after_keys.insert(path.clone(), after_key);
        }
    }
    after_keys
}
