#![warn(missing_docs)]
//! Periscope runs scheduled monitors against a search cluster, evaluates
//! their triggers and manages the resulting alerts and notifications.

pub mod cmd;
pub mod config;
pub mod engine;
pub mod http_client;
pub mod loader;
pub mod models;
pub mod notification;
pub mod persistence;
pub mod supervisor;
pub mod test_helpers;
