use std::time::Duration;

use keel_provisioner::{
    load_config, save_config, ExecutorConfig, KeelConfig, ProvisionerError, RetryPolicy,
};

#[test]
fn defaults_are_valid() {
    let config = KeelConfig::new("/tmp/keel/snapshot.json");
    assert_eq!(config.executor.parallelism, 2);
    assert_eq!(config.executor.retry.max_attempts, 4);
    config.validate().unwrap();
}

#[test]
fn backoff_doubles_and_is_capped() {
    let policy = RetryPolicy {
        max_attempts: 10,
        initial_delay_ms: 250,
        max_delay_ms: 1_000,
    };
    assert_eq!(policy.delay_after(1), Duration::from_millis(250));
    assert_eq!(policy.delay_after(2), Duration::from_millis(500));
    assert_eq!(policy.delay_after(3), Duration::from_millis(1_000));
    assert_eq!(policy.delay_after(4), Duration::from_millis(1_000));
    assert_eq!(policy.delay_after(200), Duration::from_millis(1_000));
}

#[test]
fn zero_parallelism_or_attempts_is_rejected() {
    let config = ExecutorConfig {
        parallelism: 0,
        ..ExecutorConfig::default()
    };
    assert!(matches!(config.validate(), Err(ProvisionerError::Config(_))));

    let config = ExecutorConfig {
        retry: RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        },
        ..ExecutorConfig::default()
    };
    assert!(matches!(config.validate(), Err(ProvisionerError::Config(_))));
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keel.json");

    let mut config = KeelConfig::new(dir.path().join("snapshot.json"));
    config.executor.parallelism = 8;
    save_config(&path, &config).unwrap();

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded, config);
    assert!(!dir.path().join("keel.json.tmp").exists());
}

#[test]
fn unversioned_config_is_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keel.json");
    std::fs::write(
        &path,
        r#"{ "state_path": "/var/lib/keel/snapshot.json", "parallelism": 6, "max_attempts": 2 }"#,
    )
    .unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.config_version, 1);
    assert_eq!(config.executor.parallelism, 6);
    assert_eq!(config.executor.retry.max_attempts, 2);
    assert_eq!(config.executor.retry.initial_delay_ms, 250);
}

#[test]
fn newer_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keel.json");
    std::fs::write(&path, r#"{ "config_version": 99, "state_path": "x" }"#).unwrap();

    assert!(matches!(load_config(&path), Err(ProvisionerError::Config(_))));
}

#[test]
fn invalid_values_fail_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keel.json");
    std::fs::write(
        &path,
        r#"{ "config_version": 1, "state_path": "x", "executor": { "parallelism": 0 } }"#,
    )
    .unwrap();

    assert!(matches!(load_config(&path), Err(ProvisionerError::Config(_))));
}
