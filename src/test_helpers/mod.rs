//! A set of helpers for testing

mod action;
mod alert;
mod input;
mod monitor;
mod transport;
mod trigger;

pub use action::ActionBuilder;
pub use alert::AlertBuilder;
pub use input::StaticInputExecutor;
pub use monitor::MonitorBuilder;
pub use transport::RecordingTransport;
pub use trigger::TriggerBuilder;
