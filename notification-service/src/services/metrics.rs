//! Metrics collection for notification-service.
//!
//! Counters and histograms go through the `metrics` facade and are rendered by
//! the Prometheus exporter on `GET /metrics`.

use crate::models::{Channel, Outcome};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize metrics collection. Calling it twice is a no-op.
pub fn init_metrics() -> Result<(), BuildError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Get metrics output in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_outcome(outcome: &Outcome) {
    counter!("notification_events_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_dispatch(channel: Channel, status: &'static str, elapsed: Duration) {
    let channel = channel.to_string();
    counter!("notification_dispatch_total", "channel" => channel.clone(), "status" => status)
        .increment(1);
    histogram!("notification_dispatch_duration_seconds", "channel" => channel)
        .record(elapsed.as_secs_f64());
}

pub fn record_dead_letter_write(status: &'static str) {
    counter!("notification_dead_letter_writes_total", "status" => status).increment(1);
}

pub fn record_infrastructure_error(component: &'static str) {
    counter!("notification_infrastructure_errors_total", "component" => component).increment(1);
}

pub fn set_retry_queue_depth(depth: usize) {
    gauge!("notification_retry_queue_depth").set(depth as f64);
}
