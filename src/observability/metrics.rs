use anyhow::anyhow;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::error::{AppError, Result};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the idempotency layer.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    pub fn record_request(&self, scope: &str, bypass: bool) {
        counter!("idempotency_requests_total", "scope" => scope.to_string(), "bypass" => bypass.to_string()).increment(1);
        if bypass {
            counter!("idempotency_bypass_total", "scope" => scope.to_string()).increment(1);
        }
    }

    pub fn record_replay(&self, scope: &str) {
        counter!("idempotency_replays_total", "scope" => scope.to_string()).increment(1);
    }

    pub fn record_duplicate_in_progress(&self, scope: &str) {
        counter!("idempotency_duplicates_in_progress_total", "scope" => scope.to_string()).increment(1);
    }

    pub fn record_rejected_repeat(&self, scope: &str) {
        counter!("idempotency_rejected_repeats_total", "scope" => scope.to_string()).increment(1);
    }

    pub fn record_execution(&self, scope: &str, success: bool, duration_ms: f64) {
        counter!("idempotency_executions_total", "scope" => scope.to_string(), "success" => success.to_string()).increment(1);
        histogram!("idempotency_execution_duration_ms", "scope" => scope.to_string()).record(duration_ms);
    }

    pub fn record_stale_finalization(&self, scope: &str, operation: &str) {
        counter!("idempotency_stale_finalizations_total", "scope" => scope.to_string(), "operation" => operation.to_string()).increment(1);
    }

    pub fn record_store_operation(&self, backend: &str, operation: &str, duration_ms: f64, success: bool) {
        counter!("idempotency_store_operations_total", "backend" => backend.to_string(), "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("idempotency_store_operation_duration_ms", "backend" => backend.to_string(), "operation" => operation.to_string()).record(duration_ms);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    METRICS.get_or_init(Metrics::new);
    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_requests_total", Unit::Count, "Guarded requests received");
    describe_counter!("idempotency_bypass_total", Unit::Count, "Requests that forced re-execution");
    describe_counter!("idempotency_replays_total", Unit::Count, "Cached outcomes replayed without execution");
    describe_counter!("idempotency_duplicates_in_progress_total", Unit::Count, "Duplicates rejected while the original was running");
    describe_counter!("idempotency_rejected_repeats_total", Unit::Count, "Repeats rejected by operations that refuse replay");
    describe_counter!("idempotency_executions_total", Unit::Count, "Guarded operation executions");
    describe_histogram!("idempotency_execution_duration_ms", Unit::Milliseconds, "Guarded operation latency in milliseconds");
    describe_counter!("idempotency_stale_finalizations_total", Unit::Count, "Complete/release calls from a lease holder that lost its lease");

    describe_counter!("idempotency_store_operations_total", Unit::Count, "Record store operations");
    describe_histogram!("idempotency_store_operation_duration_ms", Unit::Milliseconds, "Record store operation latency in milliseconds");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer() {
        let timer = LatencyTimer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_ms();
        assert!(elapsed >= 10.0);
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert!(metrics.initialized);
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = get_metrics();
        metrics.record_request("payments", true);
        metrics.record_execution("payments", false, 1.5);
        metrics.record_store_operation("memory", "try_acquire", 0.1, true);
    }
}
