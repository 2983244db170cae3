//! Triage fan-out: one message per uploaded log plus a per-run counter.
//!
//! The counter is an approximate, at-least-once signal. Publish and
//! increment failures are logged and never fail the request.

use bytes::Bytes;

use crate::models::triage::TriageMessage;
use crate::store::{EventBus, TriageCounter};

/// Counter key for a job run: `{tenant}_{instance}{job}{job_run}`.
pub fn counter_key(message: &TriageMessage) -> String {
    format!(
        "{}_{}{}{}",
        message.company, message.instance_id, message.job_id, message.job_run_id
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No log location; nothing was sent.
    Skipped,
    Published,
    /// The bus rejected the message.
    Failed,
}

pub struct TriageDispatcher<'a> {
    bus: &'a dyn EventBus,
    counter: &'a dyn TriageCounter,
    topic: &'a str,
}

impl<'a> TriageDispatcher<'a> {
    pub fn new(bus: &'a dyn EventBus, counter: &'a dyn TriageCounter, topic: &'a str) -> Self {
        Self {
            bus,
            counter,
            topic,
        }
    }

    /// Publish `message` and bump the run's counter concurrently.
    pub async fn dispatch(&self, message: &TriageMessage) -> DispatchOutcome {
        if message.log_location.trim().is_empty() {
            return DispatchOutcome::Skipped;
        }

        let payload = match serde_json::to_vec(message) {
            Ok(p) => Bytes::from(p),
            Err(e) => {
                tracing::error!(error = %e, job_run_id = %message.job_run_id, "Failed to encode triage message");
                return DispatchOutcome::Failed;
            }
        };
        let key = counter_key(message);

        let (published, counted) = tokio::join!(
            self.bus.publish(self.topic, payload),
            self.counter.increment(&key, 1)
        );

        match counted {
            Ok(value) => tracing::debug!(key = %key, value, "Triage counter incremented"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to increment triage counter"),
        }

        match published {
            Ok(()) => {
                crate::metrics::triage_message_published();
                tracing::debug!(
                    job_run_id = %message.job_run_id,
                    stage_id = ?message.stage_id,
                    step_id = ?message.step_id,
                    topic = self.topic,
                    "Triage message published"
                );
                DispatchOutcome::Published
            }
            Err(e) => {
                tracing::error!(
                    job_run_id = %message.job_run_id,
                    topic = self.topic,
                    error = %e,
                    "Failed to publish triage message"
                );
                DispatchOutcome::Failed
            }
        }
    }
}
