//! Tests for configuration parsing and validation

use prometheus_background::config::{BackgroundConfig, LaunchConfig, LeaseConfig, PoolConfig};

#[test]
fn test_defaults_mirror_documented_values() {
    let cfg = BackgroundConfig::default();
    assert_eq!(cfg.dispatch.default_timeout_secs, 300);
    assert_eq!(cfg.dispatch.max_retries, 10);
    assert_eq!(cfg.dispatch.poll_interval_ms, 1000);
    assert_eq!(cfg.dispatch.wait_ceiling_secs, 86_400);
    assert_eq!(cfg.pool.queue_prefix, "pool/");
    assert_eq!(cfg.pool.lock_key, "pool.lock");
    assert_eq!(cfg.pool.lease.key, "pool_server");
    assert_eq!(cfg.scheduler.list_key, "tasker_list");
    assert_eq!(cfg.scheduler.lease.key, "tasker_server");
    assert_eq!(cfg.launch, LaunchConfig::InProcess);
    assert!(cfg.signing_key.is_none());
}

#[test]
fn test_from_json_fills_missing_sections() {
    let cfg = BackgroundConfig::from_json_str(
        r#"{
            "pool": { "concurrency": 6 },
            "launch": { "mode": "loopback", "base_url": "http://127.0.0.1:8080" },
            "signing_key": "s3cret"
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.pool.concurrency, 6);
    assert_eq!(cfg.pool.stage_timeout_secs, 86_400);
    assert_eq!(cfg.launch, LaunchConfig::loopback("http://127.0.0.1:8080"));
    assert_eq!(cfg.signing_key.as_deref(), Some("s3cret"));
}

#[test]
fn test_from_json_rejects_invalid_values() {
    assert!(BackgroundConfig::from_json_str(r#"{"pool": {"concurrency": 0}}"#).is_err());
    assert!(BackgroundConfig::from_json_str(r#"{"signing_key": ""}"#).is_err());
    assert!(BackgroundConfig::from_json_str(
        r#"{"launch": {"mode": "loopback", "base_url": "ftp://host"}}"#
    )
    .is_err());
    assert!(BackgroundConfig::from_json_str("not json").is_err());
}

#[test]
fn test_process_launch_parses() {
    let cfg = BackgroundConfig::from_json_str(
        r#"{"launch": {"mode": "process", "program": "/usr/bin/worker", "args": ["run-task"]}}"#,
    )
    .unwrap();
    assert_eq!(
        cfg.launch,
        LaunchConfig::Process {
            program: Some("/usr/bin/worker".into()),
            args: vec!["run-task".into()],
        }
    );
}

#[test]
fn test_lease_timings_need_margin() {
    let tight = PoolConfig::default().with_lease(LeaseConfig::new("pool_server", 100, 100, 100));
    assert!(tight.validate().is_err());
    let ok = PoolConfig::default().with_lease(LeaseConfig::new("pool_server", 130, 150, 100));
    assert!(ok.validate().is_ok());
}
