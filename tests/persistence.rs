//! Integration tests for the SQLite alert store

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use periscope::{
    config::RhaiConfig,
    engine::{ActionDispatcher, MonitorRunner, RhaiCompiler, RhaiEvaluator},
    models::{AlertState, PeriodWindow},
    notification::TemplateService,
    persistence::{AlertStore, PersistenceError, SqliteAlertStore},
    test_helpers::{
        AlertBuilder, MonitorBuilder, RecordingTransport, StaticInputExecutor, TriggerBuilder,
    },
};
use serde_json::json;
use tempfile::TempDir;

async fn setup_db(dir: &TempDir) -> SqliteAlertStore {
    let url = format!("sqlite://{}", dir.path().join("alerts.db").display());
    let store = SqliteAlertStore::new(&url).await.expect("Failed to open database");
    store.run_migrations().await.expect("Failed to run migrations");
    store
}

#[tokio::test]
async fn test_alerts_survive_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let store = setup_db(&dir).await;

    let mut alert = AlertBuilder::new("m1", "t1").id("a1").bucket(&["web-1"]).build();
    let version = store.put_alert(&alert, 0).await.unwrap();
    alert.version = version;
    store.close().await;

    let store = setup_db(&dir).await;
    let stored = store.get_alert("a1").await.unwrap().unwrap();
    assert_eq!(stored, alert);
    assert_eq!(stored.bucket_keys_hash().as_deref(), Some("web-1"));
}

#[tokio::test]
async fn test_concurrent_writers_conflict() {
    let dir = TempDir::new().unwrap();
    let store = setup_db(&dir).await;
    store.put_alert(&AlertBuilder::new("m1", "t1").id("a1").build(), 0).await.unwrap();

    let mut first = store.get_alert("a1").await.unwrap().unwrap();
    let mut second = first.clone();
    first.state = AlertState::Acknowledged;
    second.state = AlertState::Error;

    assert_eq!(store.put_alert(&first, first.version).await.unwrap(), 2);
    let err = store.put_alert(&second, second.version).await.unwrap_err();
    assert!(matches!(err, PersistenceError::VersionConflict { ref id, expected: 1 } if id == "a1"));

    let stored = store.get_alert("a1").await.unwrap().unwrap();
    assert_eq!(stored.state, AlertState::Acknowledged);
}

#[tokio::test]
async fn test_completed_alert_cannot_be_put() {
    let dir = TempDir::new().unwrap();
    let store = setup_db(&dir).await;
    let alert = AlertBuilder::new("m1", "t1").state(AlertState::Completed).build();

    let err = store.put_alert(&alert, 0).await.unwrap_err();
    assert!(matches!(err, PersistenceError::InvalidInput(_)));
}

#[tokio::test]
async fn test_monitor_runs_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(setup_db(&dir).await);
    let runner = MonitorRunner::new(
        Arc::new(StaticInputExecutor::new(vec![
            json!({ "hits": { "total": { "value": 3 } } }),
            json!({ "hits": { "total": { "value": 0 } } }),
        ])),
        Arc::new(RhaiEvaluator::new(Arc::new(RhaiCompiler::new(&RhaiConfig::default())))),
        ActionDispatcher::new(Arc::new(RecordingTransport::new()), Arc::new(TemplateService::new()), &[]),
        store.clone(),
        10,
    );
    let monitor = MonitorBuilder::new()
        .id("m1")
        .trigger(TriggerBuilder::query_level("t1").condition("results[0].hits.total.value > 0").build())
        .build();
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

    runner.run_monitor(&monitor, PeriodWindow::new(start - Duration::minutes(1), start), false).await;
    let active = store.find_active_alerts("m1", "t1").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].version, 1);

    let end = start + Duration::minutes(1);
    runner.run_monitor(&monitor, PeriodWindow::new(start, end), false).await;
    assert!(store.find_active_alerts("m1", "t1").await.unwrap().is_empty());

    let history = store.find_history_alerts("m1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, active[0].id);
    assert_eq!(history[0].end_time, Some(end));
    assert_eq!(history[0].version, 2);
}
