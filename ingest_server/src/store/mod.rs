//! Collaborator seams of the ingestion pipeline.
//!
//! The pipeline talks to a relational store, object storage, an event bus,
//! a distributed counter and a binary-coverage converter only through the
//! traits below. Production implementations live in the sibling modules;
//! [`memory`] holds in-process implementations used by tests.

pub mod bus;
pub mod converter;
pub mod memory;
pub mod object;
pub mod postgres;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::artifact::CicdJobRunArtifact;
use crate::models::coverage::CoverageReport;
use crate::models::instance::{CicdInstance, NewCicdInstance};
use crate::models::job::CicdJob;
use crate::models::job_run::CicdJobRun;
use crate::models::stage::JobRunStage;
use crate::models::step::JobRunStageStep;
use crate::models::task::TaskStatus;
use crate::models::test_record::TestRecord;

/// Relational persistence for instances, jobs, runs and their children.
#[async_trait]
pub trait CicdStore: Send + Sync {
    async fn get_instance(&self, tenant: &str, id: Uuid) -> anyhow::Result<Option<CicdInstance>>;

    /// Create the instance or refresh its name/url. Returns the instance id.
    async fn upsert_instance(&self, instance: NewCicdInstance) -> anyhow::Result<Uuid>;

    /// Insert a job keyed by (tenant, instance, full name); on conflict the
    /// existing row is refreshed and its id returned.
    async fn upsert_job(&self, job: CicdJob) -> anyhow::Result<Uuid>;

    /// Jobs of an instance with the given normalized full name. At most
    /// `limit` rows are returned.
    async fn find_jobs_by_normalized_name(
        &self,
        tenant: &str,
        instance_id: Uuid,
        normalized_name: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<CicdJob>>;

    async fn insert_job_run(&self, run: CicdJobRun) -> anyhow::Result<Uuid>;

    async fn set_job_run_log_path(&self, tenant: &str, id: Uuid, path: &str) -> anyhow::Result<()>;

    async fn insert_stage(&self, stage: JobRunStage) -> anyhow::Result<Uuid>;

    async fn set_stage_child_job_runs(
        &self,
        tenant: &str,
        id: Uuid,
        child_job_runs: &[Uuid],
    ) -> anyhow::Result<()>;

    async fn insert_step(&self, step: JobRunStageStep) -> anyhow::Result<Uuid>;

    async fn set_step_log_path(&self, tenant: &str, id: Uuid, path: &str) -> anyhow::Result<()>;

    /// Returns the number of rows written.
    async fn insert_artifacts(&self, artifacts: Vec<CicdJobRunArtifact>) -> anyhow::Result<usize>;

    async fn coverage_report_exists(
        &self,
        tenant: &str,
        name: &str,
        file_hash: &str,
    ) -> anyhow::Result<bool>;

    /// Insert unless (tenant, name, file hash) is already stored.
    /// `None` means the report was a duplicate.
    async fn insert_coverage_report(&self, report: CoverageReport) -> anyhow::Result<Option<Uuid>>;

    /// Batch insert. Returns the number of rows written.
    async fn insert_test_records(&self, records: Vec<TestRecord>) -> anyhow::Result<usize>;

    /// Record a task status; `bump_attempt` increments the attempt count.
    async fn update_task_status(
        &self,
        tenant: &str,
        task_id: Uuid,
        status: TaskStatus,
        bump_attempt: bool,
    ) -> anyhow::Result<()>;
}

/// Object storage addressed by path within one bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket name reported to consumers of stored objects.
    fn bucket(&self) -> &str;

    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> anyhow::Result<()>;

    async fn get(&self, path: &str) -> anyhow::Result<Bytes>;
}

/// Fire-and-forget, at-least-once message publication.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()>;
}

/// Atomic fetch-and-add counter shared across workers.
#[async_trait]
pub trait TriageCounter: Send + Sync {
    /// Add `by` to `key` and return the new value.
    async fn increment(&self, key: &str, by: i64) -> anyhow::Result<i64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub customer: String,
    pub job_run_id: Uuid,
    pub reference_id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub success: bool,
    #[serde(default)]
    pub standard_output: String,
}

/// Converts proprietary binary coverage files into coverage XML.
#[async_trait]
pub trait CoverageConverter: Send + Sync {
    async fn convert(
        &self,
        request: &ConversionRequest,
        file: &Path,
    ) -> anyhow::Result<ConversionResult>;
}
