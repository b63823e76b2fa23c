//! This module contains the data models for Periscope.

pub mod action;
pub mod alert;
pub mod destination;
pub mod monitor;
pub mod notification;
pub mod run_result;
pub mod trigger;

pub use action::{Action, ActionExecutionPolicy, ActionExecutionScope, AlertCategory, Throttle};
pub use alert::{ActionExecutionResult, AggregationResultBucket, Alert, AlertError, AlertState};
pub use destination::{Destination, DestinationKind};
pub use monitor::{Input, Monitor, MonitorType};
pub use notification::{FailureClass, NotificationMessage};
pub use run_result::{
    ActionRunResult, BucketLevelTriggerRunResult, InputRunResults, MonitorRunResult, PeriodWindow,
    QueryLevelTriggerRunResult, TriggerRunResult,
};
pub use trigger::{BucketLevelTrigger, BucketSelector, QueryLevelTrigger, Trigger};
