//! A builder for creating `Monitor` instances in tests.

use serde_json::{Map, json};

use crate::{
    models::{
        monitor::{Input, IntervalUnit, Monitor, MonitorType, SCHEMA_VERSION, Schedule, SearchInput},
        trigger::Trigger,
    },
    test_helpers::TriggerBuilder,
};

/// A builder for creating `Monitor` instances in tests.
///
/// The default is a query-level monitor with one search input, a one minute
/// schedule and a single always-true trigger.
pub struct MonitorBuilder {
    id: String,
    name: String,
    monitor_type: MonitorType,
    inputs: Option<Vec<Input>>,
    triggers: Option<Vec<Trigger>>,
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorBuilder {
    /// Creates a new `MonitorBuilder` instance.
    pub fn new() -> Self {
        Self {
            id: "monitor-1".to_string(),
            name: "Test Monitor".to_string(),
            monitor_type: MonitorType::QueryLevel,
            inputs: None,
            triggers: None,
        }
    }

    /// Sets the ID for the monitor.
    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    /// Sets the name for the monitor.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Makes the monitor bucket-level.
    pub fn bucket_level(mut self) -> Self {
        self.monitor_type = MonitorType::BucketLevel;
        self
    }

    /// Adds a search input. The first call replaces the default input.
    pub fn search(mut self, indices: &[&str], query: serde_json::Value) -> Self {
        self.inputs.get_or_insert_with(Vec::new).push(Input::Search(SearchInput {
            indices: indices.iter().map(|i| i.to_string()).collect(),
            query,
        }));
        self
    }

    /// Adds a trigger. The first call replaces the default trigger.
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.get_or_insert_with(Vec::new).push(trigger);
        self
    }

    /// Builds the `Monitor` instance.
    pub fn build(self) -> Monitor {
        let inputs = self.inputs.unwrap_or_else(|| {
            vec![Input::Search(SearchInput {
                indices: vec!["logs-*".to_string()],
                query: json!({ "size": 0, "query": { "match_all": {} } }),
            })]
        });
        let triggers = self
            .triggers
            .unwrap_or_else(|| vec![TriggerBuilder::query_level("trigger-1").build()]);

        Monitor {
            id: self.id,
            version: 1,
            schema_version: SCHEMA_VERSION,
            name: self.name,
            monitor_type: self.monitor_type,
            enabled: true,
            enabled_time: None,
            schedule: Schedule::Period { interval: 1, unit: IntervalUnit::Minutes },
            inputs,
            triggers,
            user: None,
            last_run_context: Map::new(),
        }
    }
}
