//! Prometheus metrics for job-run ingestion.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a finished notification (`success`, `failure`, `timeout`).
pub fn notification_finished(status: &str, duration_ms: u64) {
    counter!("ingest_notifications_total", "status" => status.to_string()).increment(1);
    histogram!("ingest_notification_duration_ms").record(duration_ms as f64);
}

pub fn job_run_persisted() {
    counter!("ingest_job_runs_persisted_total").increment(1);
}

/// Record a skipped subtree or file.
pub fn subtree_skipped(reason: &str) {
    counter!("ingest_subtrees_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a coverage report outcome (`inserted`, `duplicate`, `failed`).
pub fn coverage_report(outcome: &str) {
    counter!("ingest_coverage_reports_total", "outcome" => outcome.to_string()).increment(1);
}

pub fn tests_persisted(count: usize) {
    counter!("ingest_tests_persisted_total").increment(count as u64);
}

/// Record an uploaded log by node kind.
pub fn log_uploaded(kind: &str) {
    counter!("ingest_logs_uploaded_total", "kind" => kind.to_string()).increment(1);
}

pub fn log_upload_failed(kind: &str) {
    counter!("ingest_log_upload_failures_total", "kind" => kind.to_string()).increment(1);
}

pub fn triage_message_published() {
    counter!("ingest_triage_messages_total").increment(1);
}
