use std::collections::BTreeSet;

use crate::models::action::{
    Action, ActionExecutionPolicy, ActionExecutionScope, AlertCategory, Throttle,
};

/// A builder for creating `Action` instances for testing.
pub struct ActionBuilder {
    name: String,
    destination_id: String,
    message_template: String,
    throttle: Option<Throttle>,
    policy: Option<ActionExecutionPolicy>,
}

impl ActionBuilder {
    /// Creates a new `ActionBuilder` with the given name. The action sends to
    /// the `console` destination.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            destination_id: "console".to_string(),
            message_template: "Monitor {{ ctx.monitor.name }} triggered".to_string(),
            throttle: None,
            policy: None,
        }
    }

    /// Sets the destination the action sends to.
    pub fn destination(mut self, destination_id: &str) -> Self {
        self.destination_id = destination_id.to_string();
        self
    }

    /// Sets the message template.
    pub fn message(mut self, template: &str) -> Self {
        self.message_template = template.to_string();
        self
    }

    /// Enables throttling with the given period.
    pub fn throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Runs the action once per alert in one of `categories`.
    pub fn per_alert(mut self, categories: &[AlertCategory]) -> Self {
        self.policy = Some(ActionExecutionPolicy {
            action_execution_scope: ActionExecutionScope::PerAlert {
                actionable_alerts: categories.iter().copied().collect::<BTreeSet<_>>(),
            },
        });
        self
    }

    /// Runs the action once per trigger execution.
    pub fn per_execution(mut self) -> Self {
        self.policy = Some(ActionExecutionPolicy {
            action_execution_scope: ActionExecutionScope::PerExecution,
        });
        self
    }

    /// Builds the `Action`.
    pub fn build(self) -> Action {
        Action {
            id: format!("{}-id", self.name),
            name: self.name,
            destination_id: self.destination_id,
            subject_template: None,
            message_template: self.message_template,
            throttle_enabled: self.throttle.is_some(),
            throttle: self.throttle,
            action_execution_policy: self.policy,
        }
    }
}
