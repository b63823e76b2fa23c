//! This module defines the data structures for trigger actions: destination
//! reference, message templates, throttling and execution policies.

use std::{collections::BTreeSet, fmt};

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// The category an alert falls into for a single bucket-level run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    /// The alert was created during this run.
    New,
    /// The alert already existed and its bucket still matches.
    Deduped,
    /// The alert's bucket no longer matches and it was completed this run.
    Completed,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCategory::New => write!(f, "NEW"),
            AlertCategory::Deduped => write!(f, "DEDUPED"),
            AlertCategory::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Unit of a throttle period.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleUnit {
    /// Seconds.
    Seconds,
    /// Minutes.
    #[default]
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

/// Minimum interval between two successful executions of an action for the
/// same alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Throttle {
    /// Number of `unit`s in the throttle period.
    pub value: u32,
    /// Unit of `value`.
    #[serde(default)]
    pub unit: ThrottleUnit,
}

impl Throttle {
    /// Creates a throttle of `value` minutes.
    pub fn minutes(value: u32) -> Self {
        Self { value, unit: ThrottleUnit::Minutes }
    }

    /// Returns the throttle period as a duration.
    pub fn duration(&self) -> Duration {
        let value = i64::from(self.value);
        match self.unit {
            ThrottleUnit::Seconds => Duration::seconds(value),
            ThrottleUnit::Minutes => Duration::minutes(value),
            ThrottleUnit::Hours => Duration::hours(value),
            ThrottleUnit::Days => Duration::days(value),
        }
    }
}

/// Scope an action runs at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionExecutionScope {
    /// Run once for every alert whose category is in `actionable_alerts`.
    PerAlert {
        /// Alert categories this action runs for.
        actionable_alerts: BTreeSet<AlertCategory>,
    },
    /// Run once per trigger execution, regardless of how many alerts fired.
    PerExecution,
}

/// Execution policy of an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionExecutionPolicy {
    /// The scope the action runs at.
    pub action_execution_scope: ActionExecutionScope,
}

impl ActionExecutionPolicy {
    /// The policy bucket-level monitors use when an action does not carry one.
    pub fn default_for_bucket_level() -> Self {
        Self {
            action_execution_scope: ActionExecutionScope::PerAlert {
                actionable_alerts: BTreeSet::from([AlertCategory::Deduped, AlertCategory::New]),
            },
        }
    }

    /// Returns whether an alert in `category` is covered by this policy.
    pub fn covers(&self, category: AlertCategory) -> bool {
        match &self.action_execution_scope {
            ActionExecutionScope::PerAlert { actionable_alerts } =>
                actionable_alerts.contains(&category),
            ActionExecutionScope::PerExecution => true,
        }
    }
}

/// An action attached to a trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Action {
    /// Stable identifier, used to correlate execution results on alerts.
    #[serde(default)]
    pub id: String,

    /// Human readable name.
    pub name: String,

    /// Name of the destination the rendered message is sent to.
    pub destination_id: String,

    /// Optional subject template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_template: Option<String>,

    /// Message body template.
    pub message_template: String,

    /// Whether `throttle` is applied.
    #[serde(default)]
    pub throttle_enabled: bool,

    /// Throttle period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<Throttle>,

    /// Explicit execution policy. When absent the policy is derived from the
    /// monitor type at evaluation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_execution_policy: Option<ActionExecutionPolicy>,
}

impl Action {
    /// The execution policy of this action on a bucket-level trigger.
    ///
    /// Actions without an explicit policy run for NEW and DEDUPED alerts.
    /// Query-level actions carry no policy and always run when their
    /// trigger is actionable.
    pub fn bucket_level_policy(&self) -> ActionExecutionPolicy {
        self.action_execution_policy
            .clone()
            .unwrap_or_else(ActionExecutionPolicy::default_for_bucket_level)
    }

    /// Returns the active throttle period, if throttling is enabled.
    pub fn throttle_period(&self) -> Option<Duration> {
        if !self.throttle_enabled {
            return None;
        }
        self.throttle.map(|t| t.duration())
    }

    /// Clamps the throttle into `[min, max]` minutes.
    ///
    /// Applied when a monitor is loaded; never at run time.
    pub fn clamp_throttle(&mut self, min_minutes: u32, max_minutes: u32) {
        let Some(throttle) = self.throttle.as_mut() else {
            return;
        };
        let minutes = throttle.duration().num_minutes();
        if minutes < i64::from(min_minutes) {
            tracing::warn!(action = %self.name, "Throttle below minimum, clamping.");
            *throttle = Throttle::minutes(min_minutes);
        } else if minutes > i64::from(max_minutes) {
            tracing::warn!(action = %self.name, "Throttle above maximum, clamping.");
            *throttle = Throttle::minutes(max_minutes);
        }
    }
}
