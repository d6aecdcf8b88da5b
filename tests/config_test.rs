//! Tests for configuration file loading.

use std::io::Write;
use std::time::Duration;

use bragi::{BragiError, BrokerConfig, CacheKind};

#[test]
fn load_explicit_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
api_url = "http://speech.local:5000/"
api_key = "from-file"
max_queued = 5

[cache]
kind = "file"
max_entries = 50
"#
    )
    .unwrap();

    let config = BrokerConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.api_url, "http://speech.local:5000");
    assert_eq!(config.api_key.as_deref(), Some("from-file"));
    assert_eq!(config.max_queued, 5);
    assert_eq!(config.cache.kind, CacheKind::File);
    assert_eq!(config.cache.max_entries, 50);
    // Unset fields keep their defaults.
    assert_eq!(config.request_timeout_duration(), Duration::from_secs(15));
    assert_eq!(config.max_simultaneous_generations, 1);
}

#[test]
fn malformed_file_is_configuration_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "max_queued = \"lots\"").unwrap();

    let err = BrokerConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, BragiError::Configuration(_)));
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn missing_explicit_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = BrokerConfig::load(Some(path.as_path())).unwrap_err();
    assert!(matches!(err, BragiError::Configuration(_)));
}

#[test]
fn builder_durations_round_trip_to_fields() {
    let config = BrokerConfig::new()
        .request_timeout(Duration::from_secs(3))
        .retry_base_delay(Duration::from_millis(40))
        .probe_interval(Duration::from_millis(1500));

    assert_eq!(config.request_timeout_secs, 3);
    assert_eq!(config.retry_base_delay_ms, 40);
    assert_eq!(config.probe_interval_ms, 1500);
}
