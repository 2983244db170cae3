//! Bounded worker pool for notifications.
//!
//! At most `max_workers` notifications are processed at once and at most
//! `queue_capacity` are accepted (running plus waiting). Each one gets a
//! coarse wall-clock timeout; a timed-out notification is marked FAILURE.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use super::pipeline::{IngestReport, Pipeline};
use crate::error::IngestError;
use crate::models::request::JobRunCompleteNotification;
use crate::models::task::TaskStatus;

#[derive(Clone)]
pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    backlog: Arc<Semaphore>,
    max_workers: usize,
    queue_capacity: usize,
    timeout: Duration,
}

/// Accepted notifications per worker when no capacity is configured.
const DEFAULT_QUEUE_PER_WORKER: usize = 16;

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, max_workers: usize, timeout: Duration) -> Self {
        let max_workers = max_workers.max(1);
        let queue_capacity = max_workers * DEFAULT_QUEUE_PER_WORKER;
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_workers)),
            backlog: Arc::new(Semaphore::new(queue_capacity)),
            max_workers,
            queue_capacity,
            timeout,
        }
    }

    /// Bound on accepted notifications, never below `max_workers`.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(self.max_workers);
        self.backlog = Arc::new(Semaphore::new(self.queue_capacity));
        self
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Queue a notification; it starts once a worker is free.
    ///
    /// Fails with [`IngestError::QueueFull`] when the backlog is at capacity
    /// and [`IngestError::PoolClosed`] after [`drain`](Self::drain).
    pub fn submit(
        &self,
        notification: JobRunCompleteNotification,
    ) -> Result<JoinHandle<Result<IngestReport, IngestError>>, IngestError> {
        let slot = self
            .backlog
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => IngestError::PoolClosed,
                TryAcquireError::NoPermits => IngestError::QueueFull(self.queue_capacity),
            })?;
        let pool = self.clone();
        Ok(tokio::spawn(async move {
            let _slot = slot;
            pool.run(notification).await
        }))
    }

    /// Process a notification on a worker slot, waiting for one if needed.
    pub async fn run(&self, notification: JobRunCompleteNotification) -> Result<IngestReport, IngestError> {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            tracing::warn!(
                tenant = %notification.tenant,
                message_id = %notification.message_id,
                "Worker pool closed before notification started"
            );
            self.pipeline
                .mark_task(&notification.tenant, notification.task_id, TaskStatus::Failure, false)
                .await;
            crate::metrics::notification_finished("rejected", 0);
            return Err(IngestError::PoolClosed);
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.pipeline.process_notification(&notification))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                let secs = self.timeout.as_secs();
                tracing::error!(
                    tenant = %notification.tenant,
                    message_id = %notification.message_id,
                    timeout_secs = secs,
                    "Notification timed out"
                );
                self.pipeline
                    .mark_task(&notification.tenant, notification.task_id, TaskStatus::Failure, false)
                    .await;
                Err(IngestError::Timeout(secs))
            }
        };

        let status = match &result {
            Ok(_) => "success",
            Err(IngestError::Timeout(_)) => "timeout",
            Err(_) => "failure",
        };
        crate::metrics::notification_finished(status, started.elapsed().as_millis() as u64);
        result
    }

    /// Stop accepting work and wait for accepted notifications to finish.
    pub async fn drain(&self) {
        self.backlog.close();
        let all = u32::try_from(self.max_workers).unwrap_or(u32::MAX);
        match self.permits.acquire_many(all).await {
            Ok(_permits) => tracing::info!("Worker pool drained"),
            Err(_) => tracing::warn!("Worker pool already closed"),
        }
        self.permits.close();
    }
}
