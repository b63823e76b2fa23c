//! The monitor run pipeline: inputs feed triggers, triggers feed the alert
//! reconciler and the action dispatcher, and the runner sequences them.

pub mod action_dispatcher;
pub mod alert_reconciler;
pub mod input;
pub mod monitor_runner;
pub mod rhai;
pub mod trigger_evaluator;

pub use action_dispatcher::ActionDispatcher;
pub use alert_reconciler::{AcknowledgeResult, acknowledge_alerts};
pub use input::{InputError, InputExecutor, SearchInputExecutor};
pub use monitor_runner::MonitorRunner;
pub use rhai::{EvaluationError, ExpressionEvaluator, RhaiCompiler, RhaiEvaluator};
pub use trigger_evaluator::TriggerEvaluator;
