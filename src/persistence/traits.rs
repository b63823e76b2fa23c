//! The alert persistence seam.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::{models::alert::Alert, persistence::error::PersistenceError};

/// Durable storage of alerts with optimistic concurrency.
///
/// Every write carries the version the writer read. Version `0` means the
/// alert has never been persisted. A mismatch fails with
/// [`PersistenceError::VersionConflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Returns a non-completed alert by id.
    async fn get_alert(&self, id: &str) -> Result<Option<Alert>, PersistenceError>;

    /// Returns the non-completed alerts of a trigger.
    async fn find_active_alerts(
        &self,
        monitor_id: &str,
        trigger_id: &str,
    ) -> Result<Vec<Alert>, PersistenceError>;

    /// Returns the completed alerts of a monitor, oldest first.
    async fn find_history_alerts(&self, monitor_id: &str) -> Result<Vec<Alert>, PersistenceError>;

    /// Inserts or updates a non-completed alert. Returns the new version.
    async fn put_alert(&self, alert: &Alert, expected_version: i64)
    -> Result<i64, PersistenceError>;

    /// Moves a completed alert into history. Returns the new version.
    async fn complete_alert(
        &self,
        alert: &Alert,
        expected_version: i64,
    ) -> Result<i64, PersistenceError>;
}
