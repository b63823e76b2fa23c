use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    engine::{InputError, InputExecutor},
    models::{monitor::Input, run_result::PeriodWindow},
};

/// An input executor that replays canned responses in order. The last
/// response is repeated once the queue is exhausted.
pub struct StaticInputExecutor {
    responses: Mutex<VecDeque<Value>>,
    received: Mutex<Vec<Input>>,
    delay: Option<Duration>,
}

impl StaticInputExecutor {
    /// Creates an executor answering with `responses`.
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            received: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleeps before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Inputs executed so far, in call order.
    pub fn received(&self) -> Vec<Input> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InputExecutor for StaticInputExecutor {
    async fn execute(&self, input: &Input, _window: &PeriodWindow) -> Result<Value, InputError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut received) = self.received.lock() {
            received.push(input.clone());
        }

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| InputError::Decode("response queue poisoned".to_string()))?;
        let response = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        response.ok_or_else(|| InputError::Decode("no canned response".to_string()))
    }
}
