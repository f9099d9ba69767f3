//! Integration tests for lumen-config

use lumen_config::*;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = LumenConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("LUMEN_LOG_LEVEL", Some("debug")),
        ("LUMEN_LOG_FORMAT", Some("json")),
        ("LUMEN_QUEUE_MAX_SIZE", Some("250")),
        ("LUMEN_QUEUE_PERSISTENCE_PATH", Some("/tmp/lumen-test/queue.json")),
        ("LUMEN_QUEUE_SAVE_INTERVAL", Some("5")),
        ("LUMEN_THUMBNAIL_MAX_WORKERS", Some("6")),
        ("LUMEN_TASK_TIMEOUT", Some("0")),
    ];

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.queue.max_size, 250);
        assert_eq!(
            config.queue.persistence_path,
            Some(PathBuf::from("/tmp/lumen-test/queue.json"))
        );
        assert_eq!(config.queue.save_interval, Duration::from_secs(5));
        assert_eq!(config.pools.thumbnail.max_workers, 6);
        assert_eq!(config.pools.scan.task_deadline(), None);
        assert_eq!(config.pools.metadata.task_deadline(), None);
    });
}

#[test]
fn test_invalid_env_value_is_reported() {
    with_vars(vec![("LUMEN_SCAN_MAX_WORKERS", Some("many"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
        assert!(err.to_string().contains("SCAN_MAX_WORKERS"));
    });
}

#[test]
fn test_env_override_is_validated() {
    with_vars(vec![("LUMEN_METADATA_MAX_WORKERS", Some("0"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::DomainError { .. }));
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("MEDIA_QUEUE_MAX_SIZE", Some("42"))], || {
        let config = ConfigLoader::with_prefix("MEDIA").from_env().unwrap();
        assert_eq!(config.queue.max_size, 42);
    });
}

#[test]
fn test_yaml_sample_parses_back() {
    let yaml = LumenConfig::generate_sample();
    let parsed: LumenConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert!(parsed.cache.namespaces.contains_key("tags"));
}

#[test]
fn test_partial_yaml_file() {
    let yaml = r#"
pools:
  scan:
    min_workers: 0
    max_workers: 3
    idle_timeout: 15
  thumbnail:
    max_workers: 2
queue:
  max_size: 500
  persistence_enabled: false
cache:
  sweep_interval: 5
  namespaces:
    people:
      ttl: 30
      max_size: 50
logging:
  level: warn
  format: compact
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    // Isolated prefix keeps parallel env-var tests from leaking in
    let config = ConfigLoader::with_prefix("LUMEN_FILE_TEST")
        .load(Some(file.path()))
        .unwrap();

    assert_eq!(config.pools.scan.min_workers, 0);
    assert_eq!(config.pools.scan.max_workers, 3);
    assert_eq!(config.pools.scan.idle_timeout, Duration::from_secs(15));
    assert_eq!(config.pools.scan.task_timeout, Duration::from_secs(30));
    assert_eq!(config.pools.thumbnail.max_workers, 2);
    assert_eq!(config.queue.max_size, 500);
    assert_eq!(config.queue.resolved_persistence_path(), None);
    assert_eq!(config.cache.namespaces.len(), 1);
    assert_eq!(config.cache.namespaces["people"].max_size, 50);
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(config.logging.format, LogFormat::Compact);
}

#[test]
fn test_min_above_max_in_file_rejected() {
    let yaml = r#"
pools:
  metadata:
    min_workers: 4
    max_workers: 1
"#;
    let err = ConfigLoader::with_prefix("LUMEN_FILE_TEST")
        .from_yaml(yaml)
        .unwrap_err();
    assert!(err.to_string().contains("metadata"));
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .from_file("/nonexistent/lumen.yaml")
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileReadError(_)));
}
