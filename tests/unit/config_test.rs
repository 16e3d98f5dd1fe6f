//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use prometheus_reservations::config::{
    CandidateRanking, CommandPoolConfig, DomainConfig, EngineConfig, ExecutorConfig, ENV_PREFIX,
};

#[test]
fn test_default_config_is_valid() {
    assert!(EngineConfig::default().validate().is_ok());
}

#[test]
fn test_command_pool_config_invalid_worker_count() {
    let invalid = CommandPoolConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_command_pool_config_invalid_queue_depth() {
    let invalid = CommandPoolConfig::new().with_max_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_command_pool_timeout_roundtrip() {
    let config = CommandPoolConfig::new().with_command_timeout(Duration::from_millis(1_500));
    assert_eq!(config.command_timeout(), Duration::from_millis(1_500));
}

#[test]
fn test_backoff_doubles_until_capped() {
    let config = ExecutorConfig {
        backoff_base_ms: 500,
        backoff_max_ms: 3_000,
        ..ExecutorConfig::default()
    };
    let ms: Vec<_> = (1..=5).map(|n| config.backoff(n).num_milliseconds()).collect();
    assert_eq!(ms, vec![500, 1_000, 2_000, 3_000, 3_000]);
}

#[test]
fn test_duplicate_domains_are_rejected() {
    let domain = DomainConfig {
        name: "east".into(),
        url: "https://east.example/api".into(),
        timeout_ms: 1_000,
    };
    let config = EngineConfig {
        domains: vec![domain.clone(), domain],
        ..EngineConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_engine_config_from_json() {
    let json = r#"{
        "scheduler": { "ranking": "least_utilized", "pass_interval_ms": 500 },
        "executor": { "max_retries": 5 },
        "domains": [
            { "name": "east", "url": "https://east.example/api" }
        ]
    }"#;

    let config = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(config.scheduler.ranking, CandidateRanking::LeastUtilized);
    assert_eq!(config.executor.max_retries, 5);
    // Unset fields keep their defaults.
    assert_eq!(config.executor.probe_interval_secs, ExecutorConfig::default().probe_interval_secs);
    assert_eq!(config.domains[0].timeout_ms, 10_000);
}

#[test]
fn test_engine_config_from_invalid_json() {
    assert!(EngineConfig::from_json_str("{ not json").is_err());
    assert!(EngineConfig::from_json_str(r#"{ "scheduler": { "pass_interval_ms": 0 } }"#).is_err());
}

#[test]
fn test_env_overrides() {
    let vars: HashMap<String, String> = [
        ("RANKING", "least_utilized"),
        ("MAX_RETRIES", "7"),
        ("WORKER_COUNT", "3"),
    ]
    .into_iter()
    .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
    .collect();

    let mut config = EngineConfig::default();
    config.apply_overrides(|key| vars.get(key).cloned()).unwrap();
    assert_eq!(config.scheduler.ranking, CandidateRanking::LeastUtilized);
    assert_eq!(config.executor.max_retries, 7);
    assert_eq!(config.commands.worker_count, 3);

    let bad = |key: &str| (key == format!("{ENV_PREFIX}MAX_RETRIES")).then(|| "many".to_string());
    assert!(config.apply_overrides(bad).is_err());
}
