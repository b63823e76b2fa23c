use std::collections::BTreeMap;

use crate::{
    models::{
        action::Action,
        trigger::{BucketLevelTrigger, BucketSelector, QueryLevelTrigger, Trigger},
    },
    test_helpers::ActionBuilder,
};

enum Kind {
    QueryLevel,
    BucketLevel { parent_bucket_path: String },
}

/// A builder for creating `Trigger` instances for testing.
pub struct TriggerBuilder {
    id: String,
    kind: Kind,
    condition: String,
    buckets_path: BTreeMap<String, String>,
    actions: Option<Vec<Action>>,
}

impl TriggerBuilder {
    /// A query-level trigger whose condition is `true`, with one action.
    pub fn query_level(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: Kind::QueryLevel,
            condition: "true".to_string(),
            buckets_path: BTreeMap::new(),
            actions: None,
        }
    }

    /// A bucket-level trigger over `parent_bucket_path` that selects every
    /// bucket, with `params.count` bound to the document count.
    pub fn bucket_level(id: &str, parent_bucket_path: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: Kind::BucketLevel { parent_bucket_path: parent_bucket_path.to_string() },
            condition: "true".to_string(),
            buckets_path: BTreeMap::from([("count".to_string(), "_count".to_string())]),
            actions: None,
        }
    }

    /// Sets the condition script.
    pub fn condition(mut self, script: &str) -> Self {
        self.condition = script.to_string();
        self
    }

    /// Binds `params.<name>` to a path inside each bucket.
    pub fn bucket_path(mut self, name: &str, path: &str) -> Self {
        self.buckets_path.insert(name.to_string(), path.to_string());
        self
    }

    /// Adds an action. The first call replaces the default action.
    pub fn action(mut self, action: Action) -> Self {
        self.actions.get_or_insert_with(Vec::new).push(action);
        self
    }

    /// Removes every action.
    pub fn without_actions(mut self) -> Self {
        self.actions = Some(Vec::new());
        self
    }

    /// Builds the `Trigger`.
    pub fn build(self) -> Trigger {
        let actions = self.actions.unwrap_or_else(|| vec![ActionBuilder::new("notify").build()]);
        let name = format!("{} trigger", self.id);
        match self.kind {
            Kind::QueryLevel => Trigger::QueryLevel(QueryLevelTrigger {
                id: self.id,
                name,
                severity: "1".to_string(),
                condition: self.condition,
                actions,
            }),
            Kind::BucketLevel { parent_bucket_path } => Trigger::BucketLevel(BucketLevelTrigger {
                id: self.id,
                name,
                severity: "1".to_string(),
                condition: BucketSelector {
                    parent_bucket_path,
                    buckets_path: self.buckets_path,
                    script: self.condition,
                    filter: None,
                },
                actions,
            }),
        }
    }
}
