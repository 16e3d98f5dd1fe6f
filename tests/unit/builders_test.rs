//! Tests for builder modules

use prometheus_reservations::builders::EngineBuilder;
use prometheus_reservations::config::{CandidateRanking, EngineConfig};
use prometheus_reservations::core::EngineError;

#[test]
fn test_engine_builder_keeps_config() {
    let mut config = EngineConfig::default();
    config.scheduler.ranking = CandidateRanking::LeastUtilized;

    let builder = EngineBuilder::new(config);
    assert_eq!(builder.config().scheduler.ranking, CandidateRanking::LeastUtilized);
}

#[test]
fn test_engine_builder_rejects_invalid_config() {
    let mut config = EngineConfig::default();
    config.executor.pass_interval_ms = 0;

    let built = EngineBuilder::new(config).build();
    assert!(matches!(built, Err(EngineError::Config(_))));
}

#[test]
fn test_engine_without_connectors_has_no_pools() {
    let Ok(engine) = EngineBuilder::new(EngineConfig::default()).build() else {
        panic!("default configuration should build");
    };
    assert!(engine.executor().pools().is_empty());
    assert!(engine.registry().snapshot().is_empty());
}
