//! Ingestion service configuration: loaded from environment variables.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Maximum number of notifications processed concurrently.
    pub max_workers: usize,
    /// Accepted notifications (running plus waiting); 0 uses the pool default.
    pub queue_capacity: usize,
    /// Wall-clock budget for one notification.
    pub task_timeout_secs: u64,
    /// Where descriptors and result bundles are read from.
    pub archive_store_url: String,
    /// Where node logs are written.
    pub log_store_url: String,
    pub triage_topic: String,
    /// Event bus base URL; empty logs triage messages instead of sending them.
    pub event_bus_url: String,
    /// Binary coverage converter base URL; empty disables binary coverage.
    pub converter_url: String,
    /// Per-request timeout of the HTTP surface.
    pub http_timeout_secs: u64,
    /// Parent of per-notification working directories; empty uses the system temp dir.
    pub work_dir: String,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let max_workers = std::env::var("INGEST_MAX_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        let queue_capacity = std::env::var("INGEST_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let task_timeout_secs = std::env::var("INGEST_TASK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(900);
        let archive_store_url = std::env::var("INGEST_ARCHIVE_STORE_URL")
            .unwrap_or_else(|_| "file:///tmp/cicd-ingest/archives".to_string());
        let log_store_url = std::env::var("INGEST_LOG_STORE_URL")
            .unwrap_or_else(|_| "file:///tmp/cicd-ingest/logs".to_string());
        let triage_topic =
            std::env::var("INGEST_TRIAGE_TOPIC").unwrap_or_else(|_| "jenkins-log-triage".to_string());
        let event_bus_url = std::env::var("INGEST_EVENT_BUS_URL").unwrap_or_default();
        let converter_url = std::env::var("INGEST_CONVERTER_URL").unwrap_or_default();
        let http_timeout_secs = std::env::var("INGEST_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let work_dir = std::env::var("INGEST_WORK_DIR").unwrap_or_default();

        if event_bus_url.is_empty() {
            tracing::warn!("INGEST_EVENT_BUS_URL not set -- triage messages will only be logged");
        }
        if converter_url.is_empty() {
            tracing::warn!("INGEST_CONVERTER_URL not set -- binary coverage import disabled");
        }

        Self {
            max_workers,
            queue_capacity,
            task_timeout_secs,
            archive_store_url,
            log_store_url,
            triage_topic,
            event_bus_url,
            converter_url,
            http_timeout_secs,
            work_dir,
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
