//! Trigger definitions: query-level conditions and bucket-level selectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::Action;

/// A bucket selector: the condition of a bucket-level trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketSelector {
    /// Name of the composite aggregation whose buckets are evaluated.
    pub parent_bucket_path: String,

    /// Variables bound into `params`, mapped to a path inside each bucket.
    /// `_count` resolves to the bucket document count and `_key` to the
    /// bucket key.
    #[serde(default)]
    pub buckets_path: BTreeMap<String, String>,

    /// Condition evaluated once per bucket.
    pub script: String,

    /// Optional filter on bucket key values, applied before the script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<BucketFilter>,
}

/// Include/exclude filter on bucket key values. Patterns are regular
/// expressions matched against whole key values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BucketFilter {
    /// A bucket is kept only if one of its key values matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    /// A bucket is dropped if one of its key values matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
}

/// A trigger evaluated once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryLevelTrigger {
    /// Stable identifier, correlates persisted alerts across monitor updates.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Severity label, copied onto alerts.
    #[serde(default = "default_severity")]
    pub severity: String,
    /// Boolean condition script.
    pub condition: String,
    /// Actions run when the trigger fires.
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A trigger evaluated once per aggregation bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BucketLevelTrigger {
    /// Stable identifier, correlates persisted alerts across monitor updates.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Severity label, copied onto alerts.
    #[serde(default = "default_severity")]
    pub severity: String,
    /// Per-bucket selector.
    pub condition: BucketSelector,
    /// Actions run for matching buckets.
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_severity() -> String {
    "1".to_string()
}

/// A monitor trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Single decision per run.
    QueryLevel(QueryLevelTrigger),
    /// One decision per aggregation bucket.
    BucketLevel(BucketLevelTrigger),
}

impl Trigger {
    /// Returns the trigger id.
    pub fn id(&self) -> &str {
        match self {
            Trigger::QueryLevel(t) => &t.id,
            Trigger::BucketLevel(t) => &t.id,
        }
    }

    /// Returns the trigger name.
    pub fn name(&self) -> &str {
        match self {
            Trigger::QueryLevel(t) => &t.name,
            Trigger::BucketLevel(t) => &t.name,
        }
    }

    /// Returns the trigger severity.
    pub fn severity(&self) -> &str {
        match self {
            Trigger::QueryLevel(t) => &t.severity,
            Trigger::BucketLevel(t) => &t.severity,
        }
    }

    /// Returns the trigger's actions.
    pub fn actions(&self) -> &[Action] {
        match self {
            Trigger::QueryLevel(t) => &t.actions,
            Trigger::BucketLevel(t) => &t.actions,
        }
    }

    /// Returns the trigger's actions mutably.
    pub fn actions_mut(&mut self) -> &mut Vec<Action> {
        match self {
            Trigger::QueryLevel(t) => &mut t.actions,
            Trigger::BucketLevel(t) => &mut t.actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_bucket_level_trigger() {
        let json = r#"{
            "bucket_level": {
                "id": "t1",
                "name": "busy hosts",
                "condition": {
                    "parent_bucket_path": "composite_agg",
                    "buckets_path": { "count": "_count" },
                    "script": "params.count > 5"
                }
            }
        }"#;
        let trigger: Trigger = serde_json::from_str(json).unwrap();
        assert_eq!(trigger.id(), "t1");
        assert_eq!(trigger.severity(), "1");
        assert!(trigger.actions().is_empty());
        match trigger {
            Trigger::BucketLevel(t) => {
                assert_eq!(t.condition.parent_bucket_path, "composite_agg");
                assert_eq!(t.condition.buckets_path.get("count").unwrap(), "_count");
                assert!(t.condition.filter.is_none());
            }
            Trigger::QueryLevel(_) => panic!("Expected a bucket-level trigger"),
        }
    }
}
