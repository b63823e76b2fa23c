//! An in-process alert store. Used by dry runs without a database and by
//! tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    models::alert::{Alert, AlertState},
    persistence::{error::PersistenceError, traits::AlertStore},
};

#[derive(Default)]
struct Tables {
    active: HashMap<String, Alert>,
    history: Vec<Alert>,
}

/// An [`AlertStore`] keeping alerts in memory.
#[derive(Default)]
pub struct InMemoryAlertStore {
    tables: RwLock<Tables>,
}

impl InMemoryAlertStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-completed alerts.
    pub async fn active_count(&self) -> usize {
        self.tables.read().await.active.len()
    }

    /// Returns every non-completed alert of a monitor.
    pub async fn all_active_alerts(&self, monitor_id: &str) -> Vec<Alert> {
        self.tables
            .read()
            .await
            .active
            .values()
            .filter(|a| a.monitor_id == monitor_id)
            .cloned()
            .collect()
    }
}

fn conflict(alert: &Alert, expected: i64) -> PersistenceError {
    PersistenceError::VersionConflict { id: alert.id.clone(), expected }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn get_alert(&self, id: &str) -> Result<Option<Alert>, PersistenceError> {
        Ok(self.tables.read().await.active.get(id).cloned())
    }

    async fn find_active_alerts(
        &self,
        monitor_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Alert>, PersistenceError> {
        let tables = self.tables.read().await;
        let mut alerts: Vec<Alert> = tables
            .active
            .values()
            .filter(|a| a.monitor_id == monitor_id && a.trigger_id == trigger_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(alerts)
    }

    async fn find_history_alerts(&self, monitor_id: &str) -> Result<Vec<Alert>, PersistenceError> {
        let tables = self.tables.read().await;
        Ok(tables.history.iter().filter(|a| a.monitor_id == monitor_id).cloned().collect())
    }

    async fn put_alert(
        &self,
        alert: &Alert,
        expected_version: i64,
    ) -> Result<i64, PersistenceError> {
        if alert.state == AlertState::Completed {
            return Err(PersistenceError::InvalidInput(format!(
                "Alert '{}' is completed and must be moved to history",
                alert.id
            )));
        }

        let mut tables = self.tables.write().await;
        let stored_version = tables.active.get(&alert.id).map(|a| a.version).unwrap_or(0);
        if stored_version != expected_version {
            return Err(conflict(alert, expected_version));
        }

        let mut stored = alert.clone();
        stored.version = expected_version + 1;
        tables.active.insert(stored.id.clone(), stored);
        Ok(expected_version + 1)
    }

    async fn complete_alert(
        &self,
        alert: &Alert,
        expected_version: i64,
    ) -> Result<i64, PersistenceError> {
        let mut tables = self.tables.write().await;
        let stored_version = tables.active.get(&alert.id).map(|a| a.version).unwrap_or(0);
        if stored_version != expected_version {
            return Err(conflict(alert, expected_version));
        }

        tables.active.remove(&alert.id);
        let mut stored = alert.clone();
        stored.version = expected_version + 1;
        tables.history.push(stored);
        Ok(expected_version + 1)
    }
}
