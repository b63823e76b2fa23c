use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer, de};

/// Custom deserializer for Duration from milliseconds
pub fn deserialize_duration_from_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
}

/// Custom deserializer for Duration from seconds
pub fn deserialize_duration_from_seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// Custom serializer for Duration to milliseconds
pub fn serialize_duration_to_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Custom serializer for Duration to seconds
pub fn serialize_duration_to_seconds<S>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_secs())
}

/// Deserializes a list of host names, normalized to lowercase.
///
/// Accepts either a YAML list or a comma separated string, the latter being
/// what environment overrides produce.
pub fn deserialize_hosts<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Hosts {
        List(Vec<String>),
        Csv(String),
    }

    let raw = match Hosts::deserialize(deserializer)? {
        Hosts::List(list) => list,
        Hosts::Csv(s) => s.split(',').map(str::to_string).collect(),
    };

    raw.into_iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .map(|h| {
            if h.contains('/') {
                Err(de::Error::custom(format!("'{h}' is not a host name")))
            } else {
                Ok(h)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct PollSettings {
        #[serde(
            deserialize_with = "deserialize_duration_from_ms",
            serialize_with = "serialize_duration_to_ms"
        )]
        interval: Duration,
        #[serde(
            deserialize_with = "deserialize_duration_from_seconds",
            serialize_with = "serialize_duration_to_seconds"
        )]
        timeout: Duration,
    }

    #[derive(Debug, Deserialize)]
    struct DenyList {
        #[serde(deserialize_with = "deserialize_hosts")]
        hosts: Vec<String>,
    }

    #[test]
    fn test_durations_read_and_write_their_units() {
        let settings: PollSettings =
            serde_json::from_str(r#"{"interval": 1500, "timeout": 30}"#).unwrap();
        assert_eq!(settings.interval, Duration::from_millis(1500));
        assert_eq!(settings.timeout, Duration::from_secs(30));

        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"interval":1500,"timeout":30}"#);
    }

    #[test]
    fn test_deserialize_hosts_from_list() {
        let list: DenyList =
            serde_json::from_str(r#"{"hosts": ["Metadata.Internal", " 169.254.169.254 "]}"#)
                .unwrap();
        assert_eq!(list.hosts, vec!["metadata.internal", "169.254.169.254"]);
    }

    #[test]
    fn test_deserialize_hosts_from_csv() {
        let list: DenyList = serde_json::from_str(r#"{"hosts": "a.local,,B.local"}"#).unwrap();
        assert_eq!(list.hosts, vec!["a.local", "b.local"]);
    }

    #[test]
    fn test_deserialize_hosts_rejects_urls() {
        let result: Result<DenyList, _> =
            serde_json::from_str(r#"{"hosts": ["http://a.local/x"]}"#);
        assert!(result.is_err());
    }
}
