//! Implementation of the AlertStore trait for SqliteAlertStore.

use async_trait::async_trait;
use sqlx::{Row, sqlite::SqliteRow};

use super::SqliteAlertStore;
use crate::{
    models::alert::{Alert, AlertState},
    persistence::{error::PersistenceError, traits::AlertStore},
};

mod alert_sql {
    pub const SELECT_ALERT_BY_ID: &str = "SELECT version, document FROM alerts WHERE id = ?";

    pub const SELECT_ACTIVE_ALERTS: &str =
        "SELECT version, document FROM alerts WHERE monitor_id = ? AND trigger_id = ?";

    pub const SELECT_HISTORY_ALERTS: &str = "SELECT version, document FROM alert_history WHERE \
                                             monitor_id = ? ORDER BY end_time ASC, id ASC";

    pub const INSERT_ALERT: &str = "INSERT OR IGNORE INTO alerts (id, monitor_id, trigger_id, \
                                    state, version, document) VALUES (?, ?, ?, ?, ?, ?)";

    pub const UPDATE_ALERT: &str = "UPDATE alerts SET state = ?, version = ?, document = ?, \
                                    updated_at = CURRENT_TIMESTAMP WHERE id = ? AND version = ?";

    pub const DELETE_ALERT: &str = "DELETE FROM alerts WHERE id = ? AND version = ?";

    pub const INSERT_HISTORY: &str = "INSERT OR REPLACE INTO alert_history (id, monitor_id, \
                                      trigger_id, version, document, end_time) VALUES (?, ?, ?, \
                                      ?, ?, ?)";
}

fn encode(alert: &Alert, version: i64) -> Result<String, PersistenceError> {
    let mut alert = alert.clone();
    alert.version = version;
    serde_json::to_string(&alert).map_err(|e| PersistenceError::SerializationError(e.to_string()))
}

fn decode(row: &SqliteRow) -> Result<Alert, PersistenceError> {
    let version: i64 = row.get("version");
    let document: String = row.get("document");
    let mut alert: Alert = serde_json::from_str(&document)
        .map_err(|e| PersistenceError::SerializationError(e.to_string()))?;
    alert.version = version;
    Ok(alert)
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_alert(&self, id: &str) -> Result<Option<Alert>, PersistenceError> {
        let row = self
            .execute_query_with_error_handling(
                "get alert",
                sqlx::query(alert_sql::SELECT_ALERT_BY_ID).bind(id).fetch_optional(&self.pool),
            )
            .await?;
        row.as_ref().map(decode).transpose()
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn find_active_alerts(
        &self,
        monitor_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Alert>, PersistenceError> {
        let rows = self
            .execute_query_with_error_handling(
                "find active alerts",
                sqlx::query(alert_sql::SELECT_ACTIVE_ALERTS)
                    .bind(monitor_id)
                    .bind(trigger_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        let mut alerts = rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        // Oldest first, matching the in-memory store.
        alerts.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(alerts)
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn find_history_alerts(&self, monitor_id: &str) -> Result<Vec<Alert>, PersistenceError> {
        let rows = self
            .execute_query_with_error_handling(
                "find history alerts",
                sqlx::query(alert_sql::SELECT_HISTORY_ALERTS)
                    .bind(monitor_id)
                    .fetch_all(&self.pool),
            )
            .await?;
        rows.iter().map(decode).collect()
    }

    #[tracing::instrument(skip(self, alert), fields(alert_id = %alert.id), level = "debug")]
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

        let new_version = expected_version + 1;
        let document = encode(alert, new_version)?;

        let result = if expected_version == 0 {
            self.execute_query_with_error_handling(
                "insert alert",
                sqlx::query(alert_sql::INSERT_ALERT)
                    .bind(&alert.id)
                    .bind(&alert.monitor_id)
                    .bind(&alert.trigger_id)
                    .bind(alert.state.as_str())
                    .bind(new_version)
                    .bind(&document)
                    .execute(&self.pool),
            )
            .await?
        } else {
            self.execute_query_with_error_handling(
                "update alert",
                sqlx::query(alert_sql::UPDATE_ALERT)
                    .bind(alert.state.as_str())
                    .bind(new_version)
                    .bind(&document)
                    .bind(&alert.id)
                    .bind(expected_version)
                    .execute(&self.pool),
            )
            .await?
        };

        if result.rows_affected() == 0 {
            tracing::debug!(expected_version, "Alert version conflict.");
            return Err(PersistenceError::VersionConflict {
                id: alert.id.clone(),
                expected: expected_version,
            });
        }

        Ok(new_version)
    }

    #[tracing::instrument(skip(self, alert), fields(alert_id = %alert.id), level = "debug")]
    async fn complete_alert(
        &self,
        alert: &Alert,
        expected_version: i64,
    ) -> Result<i64, PersistenceError> {
        let new_version = expected_version + 1;
        let document = encode(alert, new_version)?;
        let end_time = alert.end_time.unwrap_or_else(chrono::Utc::now).to_rfc3339();

        let mut tx = self.execute_query_with_error_handling("begin", self.pool.begin()).await?;

        if expected_version > 0 {
            let deleted = self
                .execute_query_with_error_handling(
                    "delete completed alert",
                    sqlx::query(alert_sql::DELETE_ALERT)
                        .bind(&alert.id)
                        .bind(expected_version)
                        .execute(&mut *tx),
                )
                .await?;
            if deleted.rows_affected() == 0 {
                tracing::debug!(expected_version, "Alert version conflict on completion.");
                return Err(PersistenceError::VersionConflict {
                    id: alert.id.clone(),
                    expected: expected_version,
                });
            }
        }

        self.execute_query_with_error_handling(
            "insert history alert",
            sqlx::query(alert_sql::INSERT_HISTORY)
                .bind(&alert.id)
                .bind(&alert.monitor_id)
                .bind(&alert.trigger_id)
                .bind(new_version)
                .bind(&document)
                .bind(&end_time)
                .execute(&mut *tx),
        )
        .await?;

        self.execute_query_with_error_handling("commit", tx.commit()).await?;
        Ok(new_version)
    }
}
