use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use url::Url;

use super::{
    HttpRetryConfig, RhaiConfig, deserialize_duration_from_ms, deserialize_duration_from_seconds,
    deserialize_hosts,
};
use crate::notification::FailureClass;

fn default_polling_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_run_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_bucket_pages() -> u32 {
    100
}

fn default_escalating_failures() -> Vec<FailureClass> {
    vec![FailureClass::Unreachable]
}

fn default_min_throttle_minutes() -> u32 {
    1
}

fn default_max_throttle_minutes() -> u32 {
    24 * 60
}

/// Inclusive bounds, in minutes, every action throttle is clamped into when
/// monitors are loaded.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleBounds {
    /// Lower bound.
    #[serde(default = "default_min_throttle_minutes")]
    pub min_minutes: u32,
    /// Upper bound.
    #[serde(default = "default_max_throttle_minutes")]
    pub max_minutes: u32,
}

impl Default for ThrottleBounds {
    fn default() -> Self {
        Self {
            min_minutes: default_min_throttle_minutes(),
            max_minutes: default_max_throttle_minutes(),
        }
    }
}

/// Application configuration for Periscope.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Database URL for the SQLite alert store.
    pub database_url: String,

    /// Base URL of the search cluster queried by monitor inputs.
    pub search_url: Url,

    /// Path to the monitor definitions.
    #[serde(skip_deserializing)]
    pub monitor_config_path: PathBuf,

    /// Path to the destination definitions.
    #[serde(skip_deserializing)]
    pub destination_config_path: PathBuf,

    /// Lower bound of every monitor's schedule interval.
    #[serde(
        deserialize_with = "deserialize_duration_from_ms",
        default = "default_polling_interval"
    )]
    pub polling_interval_ms: Duration,

    /// Upper bound of a single monitor run.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_run_timeout"
    )]
    pub run_timeout: Duration,

    /// The maximum time in seconds to wait for graceful shutdown.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,

    /// Maximum number of composite aggregation pages fetched per
    /// bucket-level run.
    #[serde(default = "default_max_bucket_pages")]
    pub max_bucket_pages: u32,

    /// Bounds applied to action throttles at load time.
    #[serde(default)]
    pub throttle_bounds: ThrottleBounds,

    /// Destination failure classes that put the alert into ERROR.
    #[serde(default = "default_escalating_failures")]
    pub escalating_failures: Vec<FailureClass>,

    /// Hosts no destination may point at.
    #[serde(default, deserialize_with = "deserialize_hosts")]
    pub destination_host_deny_list: Vec<String>,

    /// Rhai script execution limits.
    #[serde(default)]
    pub rhai: RhaiConfig,

    /// Retry policy for search requests and webhook deliveries.
    #[serde(default)]
    pub http_retry_config: HttpRetryConfig,
}

impl AppConfig {
    /// Creates a new `AppConfig` by reading `app.yaml` from the configuration
    /// directory, with `PERISCOPE__*` environment overrides.
    pub fn new(config_dir: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir_str = config_dir.unwrap_or("configs");
        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/app.yaml", config_dir_str)))
            .add_source(
                Environment::with_prefix("PERISCOPE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("escalating_failures")
                    .try_parsing(true),
            )
            .build()?;
        let mut config: Self = s.try_deserialize()?;

        let config_path = Path::new(config_dir_str);
        config.monitor_config_path = config_path.join("monitors.yaml");
        config.destination_config_path = config_path.join("destinations.yaml");

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_from_file_uses_defaults() {
        let config_content = r#"
        database_url: "sqlite::memory:"
        search_url: "http://search.local:9200"
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), config_content).unwrap();

        let temp_dir_path = temp_dir.path();
        let config = AppConfig::new(Some(temp_dir_path.to_str().unwrap())).unwrap();

        assert_eq!(config.search_url.as_str(), "http://search.local:9200/");
        assert_eq!(config.monitor_config_path, temp_dir_path.join("monitors.yaml"));
        assert_eq!(config.destination_config_path, temp_dir_path.join("destinations.yaml"));
        assert_eq!(config.run_timeout, Duration::from_secs(60));
        assert_eq!(config.max_bucket_pages, 100);
        assert_eq!(config.throttle_bounds, ThrottleBounds::default());
        assert_eq!(config.escalating_failures, vec![FailureClass::Unreachable]);
        assert!(config.destination_host_deny_list.is_empty());
    }

    #[test]
    fn test_app_config_from_file_with_overrides() {
        let config_content = r#"
        database_url: "sqlite::memory:"
        search_url: "http://localhost:9200"
        polling_interval_ms: 250
        run_timeout: 5
        max_bucket_pages: 3
        throttle_bounds:
          min_minutes: 2
        escalating_failures: [unreachable, rejected]
        destination_host_deny_list: ["Internal.Local"]
        rhai:
          max_operations: 500
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), config_content).unwrap();

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();

        assert_eq!(config.polling_interval_ms, Duration::from_millis(250));
        assert_eq!(config.run_timeout, Duration::from_secs(5));
        assert_eq!(config.max_bucket_pages, 3);
        assert_eq!(config.throttle_bounds.min_minutes, 2);
        assert_eq!(config.throttle_bounds.max_minutes, 24 * 60);
        assert_eq!(
            config.escalating_failures,
            vec![FailureClass::Unreachable, FailureClass::Rejected]
        );
        assert_eq!(config.destination_host_deny_list, vec!["internal.local"]);
        assert_eq!(config.rhai.max_operations, 500);
    }

    #[test]
    fn test_app_config_missing_file_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::new(Some(temp_dir.path().to_str().unwrap())).is_err());
    }
}
