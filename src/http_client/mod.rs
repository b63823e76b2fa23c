//! Retrying HTTP clients shared by the search executor and the notification
//! service.

mod client;
mod pool;

pub use client::create_retryable_http_client;
pub use pool::{HttpClientPool, HttpClientPoolError};
