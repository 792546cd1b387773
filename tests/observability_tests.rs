use idempotency_guard::idempotency::{IdempotencyMetrics, InMemoryRecordStore};
use idempotency_guard::observability::{
    mask_key, mask_sensitive, AggregatedHealth, DependencyHealth, HealthChecker, HealthStatus,
    LatencyTimer, LogConfig, LogFormat, Metrics,
};
use std::sync::Arc;

#[test]
fn test_log_config_default() {
    let config = LogConfig::default();
    assert_eq!(config.level, "info");
    assert_eq!(config.format, LogFormat::Pretty);
    assert!(config.include_target);
    assert!(!config.include_file);
}

#[test]
fn test_log_config_from_settings_values() {
    let config = LogConfig::new("debug", "JSON");
    assert_eq!(config.level, "debug");
    assert_eq!(config.format, LogFormat::Json);
}

#[test]
fn test_log_format_from_str() {
    assert_eq!(LogFormat::from("json"), LogFormat::Json);
    assert_eq!(LogFormat::from("compact"), LogFormat::Compact);
    assert_eq!(LogFormat::from("COMPACT"), LogFormat::Compact);
    assert_eq!(LogFormat::from("unknown"), LogFormat::Pretty);
}

#[test]
fn test_mask_sensitive_exact_boundary() {
    assert_eq!(mask_sensitive("1234", 2), "****");
}

#[test]
fn test_mask_key_hides_middle() {
    let masked = mask_key("req-6f1c2a9e-31d4");
    assert!(masked.starts_with("req-"));
    assert!(masked.ends_with("31d4"));
    assert!(masked.contains('*'));
    assert!(!masked.contains("6f1c2a9e"));
}

#[test]
fn test_metrics_recording_without_recorder() {
    let metrics = Metrics::new();
    metrics.record_request("payments", false);
    metrics.record_replay("payments");
    metrics.record_duplicate_in_progress("payments");
    metrics.record_execution("payments", true, 12.5);
    metrics.record_stale_finalization("payments", "complete");
    metrics.record_store_operation("memory", "try_acquire", 0.2, true);
    metrics.record_http_request("POST", "/api/demo/payments", 200);
}

#[test]
fn test_latency_timer_is_monotonic() {
    let timer = LatencyTimer::new();
    let first = timer.elapsed_ms();
    let second = timer.elapsed_ms();
    assert!(second >= first);
}

#[test]
fn test_duplicate_rate_empty() {
    let snapshot = IdempotencyMetrics::new().snapshot();
    assert_eq!(snapshot.duplicate_rate(), 0.0);
}

#[test]
fn test_aggregated_health_degraded() {
    let health = AggregatedHealth::new(
        "0.1.0".to_string(),
        5,
        vec![DependencyHealth::degraded("record_store:redis", "High latency detected")],
    );
    assert_eq!(health.status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_health_checker_with_memory_store() {
    let checker = HealthChecker::new(Arc::new(InMemoryRecordStore::new()));
    let dependency = checker.check_store().await;

    assert!(dependency.status.is_healthy());
    assert!(dependency.latency_ms.is_some());
    assert!(checker.is_alive());
}
