use std::{collections::HashSet, sync::Mutex};

use async_trait::async_trait;

use crate::{
    models::notification::NotificationMessage,
    notification::{NotificationError, NotificationTransport},
};

/// A transport that records every delivery. Destinations registered with
/// [`RecordingTransport::failing`] answer with a 502.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, NotificationMessage)>>,
    failing: HashSet<String>,
}

impl RecordingTransport {
    /// Creates a transport that accepts every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes deliveries to `destination_id` fail.
    pub fn failing(mut self, destination_id: &str) -> Self {
        self.failing.insert(destination_id.to_string());
        self
    }

    /// Messages delivered so far, with their destination.
    pub fn sent(&self) -> Vec<(String, NotificationMessage)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Bodies delivered so far.
    pub fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, m)| m.body).collect()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(
        &self,
        destination_id: &str,
        message: &NotificationMessage,
    ) -> Result<String, NotificationError> {
        if self.failing.contains(destination_id) {
            return Err(NotificationError::ServerError { status: 502 });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((destination_id.to_string(), message.clone()));
        }
        Ok("ok".to_string())
    }
}
