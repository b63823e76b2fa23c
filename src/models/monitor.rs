//! This module defines the `Monitor` structure: a scheduled set of inputs
//! whose results are evaluated by triggers.

use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::trigger::Trigger;
use crate::{
    config::ThrottleBounds,
    loader::{Loadable, LoaderError},
};

/// Current schema version written onto monitors and alerts.
pub const SCHEMA_VERSION: u32 = 5;

/// The kind of monitor, which selects the run pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum MonitorType {
    /// One trigger decision per run.
    #[default]
    #[serde(rename = "query_level_monitor")]
    QueryLevel,
    /// One trigger decision per aggregation bucket.
    #[serde(rename = "bucket_level_monitor")]
    BucketLevel,
    /// Per-document findings. Not executed by this runner.
    #[serde(rename = "doc_level_monitor")]
    DocLevel,
    /// Query-level semantics over a cluster API response.
    #[serde(rename = "cluster_metrics_monitor")]
    ClusterMetrics,
}

/// Unit of a schedule interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
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

/// When a monitor runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Run every `interval` `unit`s.
    Period {
        /// Number of units between runs.
        interval: u64,
        /// Unit of `interval`.
        #[serde(default)]
        unit: IntervalUnit,
    },
}

impl Schedule {
    /// Returns the time between two runs.
    pub fn interval(&self) -> Duration {
        match self {
            Schedule::Period { interval, unit } => {
                let secs = match unit {
                    IntervalUnit::Seconds => 1,
                    IntervalUnit::Minutes => 60,
                    IntervalUnit::Hours => 3_600,
                    IntervalUnit::Days => 86_400,
                };
                Duration::from_secs(interval.saturating_mul(secs))
            }
        }
    }
}

/// The user a monitor runs as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct User {
    /// User name.
    pub name: String,
    /// Backend roles of the user.
    #[serde(default)]
    pub backend_roles: Vec<String>,
    /// Roles of the user.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A search against one or more indices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchInput {
    /// Indices searched.
    #[serde(default)]
    pub indices: Vec<String>,
    /// Query body. String leaves may reference `{{ period_start }}` and
    /// `{{ period_end }}`.
    pub query: Value,
}

/// A call to a cluster API path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMetricsInput {
    /// API path, e.g. `_cluster/health`.
    pub path: String,
}

/// A monitor input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    /// Search input.
    Search(SearchInput),
    /// Cluster metrics input.
    ClusterMetrics(ClusterMetricsInput),
}

/// A monitor definition as handed to the runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    /// Unique identifier. Assigned on load when empty.
    #[serde(default)]
    pub id: String,

    /// Monitor document version.
    #[serde(default)]
    pub version: u64,

    /// Schema version of the monitor document.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Name of the monitor.
    pub name: String,

    /// Kind of the monitor.
    #[serde(default)]
    pub monitor_type: MonitorType,

    /// Whether the scheduler runs this monitor.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// When the monitor was last enabled.
    #[serde(default)]
    pub enabled_time: Option<DateTime<Utc>>,

    /// Run schedule.
    pub schedule: Schedule,

    /// Inputs, executed in order.
    #[serde(default)]
    pub inputs: Vec<Input>,

    /// Triggers, evaluated independently.
    #[serde(default)]
    pub triggers: Vec<Trigger>,

    /// Owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    /// Opaque cursor state carried between incremental runs.
    #[serde(default)]
    pub last_run_context: Map<String, Value>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_enabled() -> bool {
    true
}

impl Monitor {
    /// Returns the trigger with the given id.
    pub fn trigger(&self, id: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.id() == id)
    }

    /// Checks the shape of the monitor.
    pub fn validate(&self) -> Result<(), MonitorConfigError> {
        if self.name.trim().is_empty() {
            return Err(MonitorConfigError::EmptyName);
        }

        let mut seen = HashSet::new();
        for trigger in &self.triggers {
            if !seen.insert(trigger.id()) {
                return Err(MonitorConfigError::DuplicateTriggerId {
                    monitor_name: self.name.clone(),
                    trigger_id: trigger.id().to_string(),
                });
            }

            let matches_type = match (self.monitor_type, trigger) {
                (MonitorType::BucketLevel, Trigger::BucketLevel(_)) => true,
                (MonitorType::QueryLevel | MonitorType::ClusterMetrics, Trigger::QueryLevel(_)) =>
                    true,
                (MonitorType::DocLevel, _) => true,
                _ => false,
            };
            if !matches_type {
                return Err(MonitorConfigError::TriggerTypeMismatch {
                    monitor_name: self.name.clone(),
                    trigger_id: trigger.id().to_string(),
                });
            }

            let mut action_ids = HashSet::new();
            for action in trigger.actions() {
                if !action_ids.insert(action.id.as_str()) {
                    return Err(MonitorConfigError::DuplicateActionId {
                        trigger_id: trigger.id().to_string(),
                        action_id: action.id.clone(),
                    });
                }
                if action.throttle_enabled && action.throttle.is_none() {
                    return Err(MonitorConfigError::MissingThrottle {
                        action_name: action.name.clone(),
                    });
                }
                if self.monitor_type != MonitorType::BucketLevel
                    && action.action_execution_policy.is_some()
                {
                    return Err(MonitorConfigError::ExecutionPolicyOutsideBucketLevel {
                        monitor_name: self.name.clone(),
                        action_name: action.name.clone(),
                    });
                }
                let per_execution = matches!(
                    action.action_execution_policy.as_ref().map(|p| &p.action_execution_scope),
                    Some(super::action::ActionExecutionScope::PerExecution)
                );
                if per_execution && action.throttle_enabled {
                    return Err(MonitorConfigError::ThrottleWithPerExecution {
                        action_name: action.name.clone(),
                    });
                }
            }
        }

        if self.monitor_type == MonitorType::BucketLevel
            && !self.inputs.iter().all(|i| matches!(i, Input::Search(_)))
        {
            return Err(MonitorConfigError::BucketLevelRequiresSearch {
                monitor_name: self.name.clone(),
            });
        }

        Ok(())
    }

    /// Fills in missing identifiers for the monitor and its actions.
    ///
    /// Derived ids depend only on the monitor name, trigger id and action
    /// name, so reloading the same file yields the same ids and persisted
    /// alerts keep matching their monitor and actions.
    pub fn assign_missing_ids(&mut self) {
        if self.id.is_empty() {
            self.id = derive_id(&["monitor", &self.name]);
        }
        let monitor_id = self.id.clone();
        for trigger in &mut self.triggers {
            let trigger_id = trigger.id().to_string();
            for action in trigger.actions_mut() {
                if action.id.is_empty() {
                    action.id = derive_id(&["action", &monitor_id, &trigger_id, &action.name]);
                }
            }
        }
    }

    /// Clamps every action throttle into the configured bounds.
    pub fn clamp_throttles(&mut self, bounds: &ThrottleBounds) {
        for trigger in &mut self.triggers {
            for action in trigger.actions_mut() {
                action.clamp_throttle(bounds.min_minutes, bounds.max_minutes);
            }
        }
    }
}

/// A UUID-formatted id taken from the sha256 of the NUL-joined parts.
fn derive_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

/// Errors raised while loading or validating monitors.
#[derive(Debug, Error)]
pub enum MonitorConfigError {
    /// An error occurred during the loading process.
    #[error("Failed to load monitor configuration: {0}")]
    Loader(#[from] LoaderError),

    /// Monitor without a name.
    #[error("Monitor name cannot be empty.")]
    EmptyName,

    /// Two triggers share an id.
    #[error("Monitor '{monitor_name}' has duplicate trigger id '{trigger_id}'.")]
    DuplicateTriggerId {
        /// Monitor name.
        monitor_name: String,
        /// The duplicated id.
        trigger_id: String,
    },

    /// Two actions of a trigger share an id.
    #[error("Trigger '{trigger_id}' has duplicate action id '{action_id}'.")]
    DuplicateActionId {
        /// Owning trigger.
        trigger_id: String,
        /// The duplicated id.
        action_id: String,
    },

    /// Trigger kind does not match the monitor type.
    #[error("Trigger '{trigger_id}' does not match the type of monitor '{monitor_name}'.")]
    TriggerTypeMismatch {
        /// Monitor name.
        monitor_name: String,
        /// Offending trigger.
        trigger_id: String,
    },

    /// Throttling enabled without a throttle period.
    #[error("Action '{action_name}' enables throttling without a throttle period.")]
    MissingThrottle {
        /// Offending action.
        action_name: String,
    },

    /// Execution policies only apply to bucket-level monitors.
    #[error(
        "Action '{action_name}' of monitor '{monitor_name}' sets an execution policy, which only \
         bucket-level monitors support."
    )]
    ExecutionPolicyOutsideBucketLevel {
        /// Monitor name.
        monitor_name: String,
        /// Offending action.
        action_name: String,
    },

    /// Throttling is not supported for per-execution actions.
    #[error("Action '{action_name}' cannot throttle a per-execution policy.")]
    ThrottleWithPerExecution {
        /// Offending action.
        action_name: String,
    },

    /// Bucket-level monitors paginate search inputs only.
    #[error("Bucket-level monitor '{monitor_name}' only supports search inputs.")]
    BucketLevelRequiresSearch {
        /// Monitor name.
        monitor_name: String,
    },
}

impl Loadable for Monitor {
    type Context = ThrottleBounds;
    type Error = MonitorConfigError;

    const KEY: &'static str = "monitors";

    fn validate(&mut self, bounds: &ThrottleBounds) -> Result<(), Self::Error> {
        self.assign_missing_ids();
        self.clamp_throttles(bounds);
        Monitor::validate(self)
    }
}
