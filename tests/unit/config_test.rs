//! Tests for configuration validation and loading

use prometheus_exchange::builders::ExchangeFactory;
use prometheus_exchange::config::{ControllerConfig, ExchangeConfig, ServerConfig};
use prometheus_exchange::core::NoopMetrics;
use prometheus_exchange::infra::InMemoryTransport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config_is_valid() {
    let cfg = ServerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.controller.standard_queue_depth, 0);
    assert_eq!(cfg.controller.priority_queue_depth, 0);
    assert!(cfg.controller.priority_parallelism >= 1);
    assert_eq!(cfg.exchange.timeout(), Duration::from_secs(30));
}

#[test]
fn test_controller_config_invalid_parallelism() {
    assert!(ControllerConfig::new()
        .with_standard_parallelism(0)
        .validate()
        .is_err());
    assert!(ControllerConfig::new()
        .with_priority_parallelism(0)
        .validate()
        .is_err());
}

#[test]
fn test_exchange_config_invalid_timeout() {
    let cfg = ExchangeConfig::new().with_timeout_ms(0);
    assert!(cfg.validate().is_err());

    let factory = ExchangeFactory::new(cfg, Arc::new(NoopMetrics));
    let (transport, _) = InMemoryTransport::get("/");
    assert!(factory.create(transport).is_err());
}

#[test]
fn test_timeout_nanos_conversion() {
    let cfg = ExchangeConfig::new().with_timeout_ms(50);
    assert_eq!(cfg.timeout_nanos(), 50_000_000);
}

#[test]
fn test_json_partial_sections_use_defaults() {
    let cfg = ServerConfig::from_json_str(
        r#"{ "controller": { "priority_parallelism": 1 }, "exchange": { "timeout_ms": 250 } }"#,
    )
    .unwrap();
    assert_eq!(cfg.controller.priority_parallelism, 1);
    assert_eq!(cfg.controller.shutdown_grace_ms, 5_000);
    assert_eq!(cfg.exchange.timeout_ms, 250);
    assert_eq!(cfg.exchange.response_buffer_capacity, 1024 * 1024);
}

#[test]
fn test_json_validation_error_names_section() {
    let err = ServerConfig::from_json_str(r#"{ "exchange": { "timeout_ms": 0 } }"#).unwrap_err();
    assert!(err.starts_with("exchange invalid"), "{err}");

    let err = ServerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}

#[test]
fn test_env_lookup_overrides_defaults() {
    let cfg = ServerConfig::from_lookup(lookup(&[
        ("EXCHANGE_STANDARD_PARALLELISM", "6"),
        ("EXCHANGE_PRIORITY_QUEUE_DEPTH", "3"),
        ("EXCHANGE_WATCHDOG", "false"),
        ("EXCHANGE_TIMEOUT_MS", " 1500 "),
        ("EXCHANGE_RESPONSE_BUFFER_CAPACITY", "4096"),
    ]))
    .unwrap();
    assert_eq!(cfg.controller.standard_parallelism, 6);
    assert_eq!(cfg.controller.priority_queue_depth, 3);
    assert!(!cfg.controller.watchdog);
    assert_eq!(cfg.exchange.timeout_ms, 1500);
    assert_eq!(cfg.exchange.response_buffer_capacity, 4096);
    assert_eq!(cfg.exchange.request_buffer_capacity, 64 * 1024);
}

#[test]
fn test_env_lookup_reports_bad_value() {
    let err = ServerConfig::from_lookup(lookup(&[("EXCHANGE_IO_THREADS", "many")])).unwrap_err();
    assert!(err.contains("EXCHANGE_IO_THREADS"), "{err}");
}
