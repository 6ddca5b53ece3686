//! Prometheus metrics for pipeline observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("autofix_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a build state transition.
pub fn build_status_changed(status: &str) {
    counter!("autofix_builds_total", "status" => status.to_string()).increment(1);
}

/// Record build duration.
pub fn build_duration(duration_ms: u64) {
    histogram!("autofix_build_duration_ms").record(duration_ms as f64);
}

/// Record a poll loop that ran out of budget.
pub fn poll_timeout(platform: &str) {
    counter!("autofix_poll_timeouts_total", "platform" => platform.to_string()).increment(1);
}

/// Record a fix attempt state transition.
pub fn fix_attempt_status_changed(fix_type: &str, status: &str) {
    counter!(
        "autofix_fix_attempts_total",
        "fix_type" => fix_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a job picked up by a worker queue.
pub fn job_started(queue: &str) {
    counter!("autofix_jobs_total", "queue" => queue.to_string()).increment(1);
}
