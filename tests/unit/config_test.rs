//! Tests for configuration validation and loading

use std::io::Write as _;

use resource_runtime::config::{RuntimeConfig, WorkerPoolConfig};

#[test]
fn test_default_config_is_valid() {
    let config = RuntimeConfig::default();
    assert!(config.validate().is_ok());
    assert!(config.pool.worker_count >= 2);
    assert_eq!(config.handlers.max_idle_per_module, 4);
    assert_eq!(config.timer.worker_threads, 1);
}

#[test]
fn test_pool_config_invalid_worker_count() {
    let invalid = WorkerPoolConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());

    let config = RuntimeConfig::new().with_pool(invalid);
    let err = config.validate().unwrap_err();
    assert!(err.starts_with("pool invalid"), "{err}");
}

#[test]
fn test_pool_config_invalid_queue_and_stack() {
    assert!(WorkerPoolConfig::new()
        .with_max_queue_depth(0)
        .validate()
        .is_err());
    assert!(WorkerPoolConfig::new()
        .with_thread_stack_size(1024)
        .validate()
        .is_err());
}

#[test]
fn test_zero_intervals_rejected() {
    assert!(RuntimeConfig::new()
        .with_reclaim_interval_ms(0)
        .validate()
        .is_err());

    let mut config = RuntimeConfig::new();
    config.timer.worker_threads = 0;
    assert!(config.validate().is_err());

    let mut config = RuntimeConfig::new();
    config.shutdown_timeout_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_from_json_fills_missing_sections() {
    let config = RuntimeConfig::from_json_str(
        r#"{ "pool": { "worker_count": 3 }, "handlers": { "max_idle_per_module": 9 } }"#,
    )
    .unwrap();

    assert_eq!(config.pool.worker_count, 3);
    assert_eq!(config.pool.max_queue_depth, 10_000);
    assert_eq!(config.handlers.max_idle_per_module, 9);
    assert_eq!(config.locks.reclaim_interval_ms, 1_000);
}

#[test]
fn test_from_json_rejects_bad_input() {
    let err = RuntimeConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");

    assert!(RuntimeConfig::from_json_str(r#"{ "pool": { "worker_count": 0 } }"#).is_err());
}

#[test]
fn test_load_from_file() {
    let mut path = std::env::temp_dir();
    path.push(format!("resource-runtime-{}.json", uuid::Uuid::new_v4()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{ "locks": {{ "reclaim_interval_ms": 250 }} }}"#).unwrap();
    }

    let config = RuntimeConfig::load(&path).unwrap();
    assert_eq!(config.locks.reclaim_interval_ms, 250);
    std::fs::remove_file(&path).unwrap();

    let err = RuntimeConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("reading runtime config"));
}

#[test]
fn test_config_roundtrips_through_json() {
    let config = RuntimeConfig::new().with_max_idle_handlers(7);
    let raw = serde_json::to_string(&config).unwrap();
    assert_eq!(RuntimeConfig::from_json_str(&raw).unwrap(), config);
}
