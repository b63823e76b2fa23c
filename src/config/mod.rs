//! Configuration module for Periscope.

mod app_config;
mod helpers;
mod http_retry;
mod rhai;

pub use app_config::{AppConfig, ThrottleBounds};
pub use helpers::{
    deserialize_duration_from_ms, deserialize_duration_from_seconds, deserialize_hosts,
    serialize_duration_to_ms, serialize_duration_to_seconds,
};
pub use http_retry::{HttpRetryConfig, JitterSetting};
pub use rhai::RhaiConfig;
