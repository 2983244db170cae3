//! In-process implementations of the collaborator traits.
//!
//! Used by the test suites and by local runs without Postgres. Every store
//! exposes snapshot accessors so assertions can inspect what was written.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CicdStore, ConversionRequest, ConversionResult, CoverageConverter, EventBus, TriageCounter,
};
use crate::models::artifact::CicdJobRunArtifact;
use crate::models::coverage::CoverageReport;
use crate::models::instance::{CicdInstance, NewCicdInstance};
use crate::models::job::CicdJob;
use crate::models::job_run::CicdJobRun;
use crate::models::stage::JobRunStage;
use crate::models::step::JobRunStageStep;
use crate::models::task::TaskStatus;
use crate::models::test_record::TestRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    pub status: TaskStatus,
    pub attempt_count: i32,
}

#[derive(Default)]
struct Tables {
    instances: HashMap<Uuid, CicdInstance>,
    jobs: Vec<CicdJob>,
    job_runs: Vec<CicdJobRun>,
    stages: Vec<JobRunStage>,
    steps: Vec<JobRunStageStep>,
    artifacts: Vec<CicdJobRunArtifact>,
    coverage: Vec<CoverageReport>,
    tests: Vec<TestRecord>,
    tasks: HashMap<Uuid, TaskState>,
    task_history: Vec<(Uuid, TaskStatus)>,
}

/// Relational store kept in memory.
#[derive(Default)]
pub struct MemoryCicdStore {
    tables: Mutex<Tables>,
    failing_stages: Mutex<HashSet<String>>,
}

impl MemoryCicdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_instance(&self, instance: CicdInstance) {
        self.tables.lock().await.instances.insert(instance.id, instance);
    }

    pub async fn seed_job(&self, job: CicdJob) {
        self.tables.lock().await.jobs.push(job);
    }

    /// Make every insert of a stage with this name fail.
    pub async fn fail_stage_named(&self, name: &str) {
        self.failing_stages.lock().await.insert(name.to_string());
    }

    pub async fn instance(&self, id: Uuid) -> Option<CicdInstance> {
        self.tables.lock().await.instances.get(&id).cloned()
    }

    pub async fn jobs(&self) -> Vec<CicdJob> {
        self.tables.lock().await.jobs.clone()
    }

    pub async fn job_runs(&self) -> Vec<CicdJobRun> {
        self.tables.lock().await.job_runs.clone()
    }

    pub async fn stages(&self) -> Vec<JobRunStage> {
        self.tables.lock().await.stages.clone()
    }

    pub async fn steps(&self) -> Vec<JobRunStageStep> {
        self.tables.lock().await.steps.clone()
    }

    pub async fn artifacts(&self) -> Vec<CicdJobRunArtifact> {
        self.tables.lock().await.artifacts.clone()
    }

    pub async fn coverage_reports(&self) -> Vec<CoverageReport> {
        self.tables.lock().await.coverage.clone()
    }

    pub async fn test_records(&self) -> Vec<TestRecord> {
        self.tables.lock().await.tests.clone()
    }

    pub async fn task(&self, task_id: Uuid) -> Option<TaskState> {
        self.tables.lock().await.tasks.get(&task_id).copied()
    }

    /// Every status written for a task, oldest first.
    pub async fn task_history(&self, task_id: Uuid) -> Vec<TaskStatus> {
        self.tables
            .lock()
            .await
            .task_history
            .iter()
            .filter(|(id, _)| *id == task_id)
            .map(|(_, status)| *status)
            .collect()
    }
}

#[async_trait]
impl CicdStore for MemoryCicdStore {
    async fn get_instance(&self, tenant: &str, id: Uuid) -> anyhow::Result<Option<CicdInstance>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .instances
            .get(&id)
            .filter(|i| i.tenant_id == tenant)
            .cloned())
    }

    async fn upsert_instance(&self, instance: NewCicdInstance) -> anyhow::Result<Uuid> {
        let mut tables = self.tables.lock().await;
        let entry = tables
            .instances
            .entry(instance.id)
            .or_insert_with(|| CicdInstance {
                id: instance.id,
                tenant_id: instance.tenant_id.clone(),
                name: None,
                url: None,
                instance_type: instance.instance_type.clone(),
                integration_id: None,
            });
        entry.name = instance.name;
        entry.url = instance.url;
        entry.instance_type = instance.instance_type;
        Ok(entry.id)
    }

    async fn upsert_job(&self, job: CicdJob) -> anyhow::Result<Uuid> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.jobs.iter_mut().find(|j| {
            j.tenant_id == job.tenant_id
                && j.cicd_instance_id == job.cicd_instance_id
                && j.job_full_name == job.job_full_name
        }) {
            existing.scm_url = job.scm_url;
            existing.scm_user_id = job.scm_user_id;
            existing.job_normalized_full_name = job.job_normalized_full_name;
            existing.branch_name = job.branch_name;
            return Ok(existing.id);
        }
        let id = job.id;
        tables.jobs.push(job);
        Ok(id)
    }

    async fn find_jobs_by_normalized_name(
        &self,
        tenant: &str,
        instance_id: Uuid,
        normalized_name: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<CicdJob>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .jobs
            .iter()
            .filter(|j| {
                j.tenant_id == tenant
                    && j.cicd_instance_id == instance_id
                    && j.job_normalized_full_name.as_deref() == Some(normalized_name)
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn insert_job_run(&self, run: CicdJobRun) -> anyhow::Result<Uuid> {
        let id = run.id;
        self.tables.lock().await.job_runs.push(run);
        Ok(id)
    }

    async fn set_job_run_log_path(&self, tenant: &str, id: Uuid, path: &str) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        let run = tables
            .job_runs
            .iter_mut()
            .find(|r| r.id == id && r.tenant_id == tenant)
            .ok_or_else(|| anyhow::anyhow!("job run {id} not found"))?;
        run.log_path = Some(path.to_string());
        Ok(())
    }

    async fn insert_stage(&self, stage: JobRunStage) -> anyhow::Result<Uuid> {
        if self.failing_stages.lock().await.contains(&stage.name) {
            anyhow::bail!("stage insert rejected: {}", stage.name);
        }
        let id = stage.id;
        self.tables.lock().await.stages.push(stage);
        Ok(id)
    }

    async fn set_stage_child_job_runs(
        &self,
        tenant: &str,
        id: Uuid,
        child_job_runs: &[Uuid],
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        let stage = tables
            .stages
            .iter_mut()
            .find(|s| s.id == id && s.tenant_id == tenant)
            .ok_or_else(|| anyhow::anyhow!("stage {id} not found"))?;
        stage.child_job_runs = child_job_runs.to_vec();
        Ok(())
    }

    async fn insert_step(&self, step: JobRunStageStep) -> anyhow::Result<Uuid> {
        let id = step.id;
        self.tables.lock().await.steps.push(step);
        Ok(id)
    }

    async fn set_step_log_path(&self, tenant: &str, id: Uuid, path: &str) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        let step = tables
            .steps
            .iter_mut()
            .find(|s| s.id == id && s.tenant_id == tenant)
            .ok_or_else(|| anyhow::anyhow!("step {id} not found"))?;
        step.log_path = Some(path.to_string());
        Ok(())
    }

    async fn insert_artifacts(&self, artifacts: Vec<CicdJobRunArtifact>) -> anyhow::Result<usize> {
        let written = artifacts.len();
        self.tables.lock().await.artifacts.extend(artifacts);
        Ok(written)
    }

    async fn coverage_report_exists(
        &self,
        tenant: &str,
        name: &str,
        file_hash: &str,
    ) -> anyhow::Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .coverage
            .iter()
            .any(|c| c.tenant_id == tenant && c.name == name && c.file_hash == file_hash))
    }

    async fn insert_coverage_report(&self, report: CoverageReport) -> anyhow::Result<Option<Uuid>> {
        let mut tables = self.tables.lock().await;
        let duplicate = tables.coverage.iter().any(|c| {
            c.tenant_id == report.tenant_id && c.name == report.name && c.file_hash == report.file_hash
        });
        if duplicate {
            return Ok(None);
        }
        let id = report.id;
        tables.coverage.push(report);
        Ok(Some(id))
    }

    async fn insert_test_records(&self, records: Vec<TestRecord>) -> anyhow::Result<usize> {
        let mut tables = self.tables.lock().await;
        let mut written = 0;
        for record in records {
            let duplicate = tables.tests.iter().any(|t| {
                t.cicd_job_run_id == record.cicd_job_run_id && t.test_name == record.test_name
            });
            if !duplicate {
                tables.tests.push(record);
                written += 1;
            }
        }
        Ok(written)
    }

    async fn update_task_status(
        &self,
        _tenant: &str,
        task_id: Uuid,
        status: TaskStatus,
        bump_attempt: bool,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        let state = tables.tasks.entry(task_id).or_insert(TaskState {
            status,
            attempt_count: 0,
        });
        state.status = status;
        if bump_attempt {
            state.attempt_count += 1;
        }
        tables.task_history.push((task_id, status));
        Ok(())
    }
}

/// Records every publication.
#[derive(Default)]
pub struct MemoryEventBus {
    published: Mutex<Vec<(String, Bytes)>>,
    fail: bool,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose publish always fails.
    pub fn failing() -> Self {
        Self {
            published: Mutex::default(),
            fail: true,
        }
    }

    pub async fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().await.clone()
    }

    /// Published payloads on `topic` decoded as JSON.
    pub async fn messages<T: serde::de::DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("event bus unavailable");
        }
        self.published
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTriageCounter {
    values: Mutex<HashMap<String, i64>>,
}

impl MemoryTriageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn value(&self, key: &str) -> i64 {
        self.values.lock().await.get(key).copied().unwrap_or(0)
    }

    pub async fn total(&self) -> i64 {
        self.values.lock().await.values().sum()
    }
}

#[async_trait]
impl TriageCounter for MemoryTriageCounter {
    async fn increment(&self, key: &str, by: i64) -> anyhow::Result<i64> {
        let mut values = self.values.lock().await;
        let value = values.entry(key.to_string()).or_insert(0);
        *value += by;
        Ok(*value)
    }
}

/// Converter that answers every request with a fixed result.
pub struct StaticCoverageConverter {
    result: ConversionResult,
    calls: Mutex<Vec<ConversionRequest>>,
}

impl StaticCoverageConverter {
    pub fn new(result: ConversionResult) -> Self {
        Self {
            result,
            calls: Mutex::default(),
        }
    }

    /// Converter that succeeds with `xml` as its output.
    pub fn succeeding(xml: &str) -> Self {
        Self::new(ConversionResult {
            success: true,
            standard_output: xml.to_string(),
        })
    }

    pub async fn calls(&self) -> Vec<ConversionRequest> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CoverageConverter for StaticCoverageConverter {
    async fn convert(
        &self,
        request: &ConversionRequest,
        _file: &Path,
    ) -> anyhow::Result<ConversionResult> {
        self.calls.lock().await.push(request.clone());
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counter_is_monotonic() {
        let counter = MemoryTriageCounter::new();
        assert_eq!(counter.increment("k", 1).await.unwrap(), 1);
        assert_eq!(counter.increment("k", 1).await.unwrap(), 2);
        assert_eq!(counter.increment("other", 1).await.unwrap(), 1);
        assert_eq!(counter.total().await, 3);
    }

    #[tokio::test]
    async fn test_upsert_job_is_singleton() {
        let store = MemoryCicdStore::new();
        let instance_id = Uuid::new_v4();
        let job = CicdJob {
            id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            cicd_instance_id: instance_id,
            job_name: "build".to_string(),
            job_full_name: "app/build".to_string(),
            job_normalized_full_name: Some("app/build".to_string()),
            branch_name: None,
            module_name: None,
            scm_url: None,
            scm_user_id: None,
        };
        let first = store.upsert_job(job.clone()).await.unwrap();
        let second = store
            .upsert_job(CicdJob {
                id: Uuid::new_v4(),
                scm_url: Some("https://github.com/acme/app".to_string()),
                ..job
            })
            .await
            .unwrap();

        assert_eq!(first, second);
        let jobs = store.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].scm_url.as_deref(), Some("https://github.com/acme/app"));
    }

    #[tokio::test]
    async fn test_upsert_instance_keeps_integration() {
        let store = MemoryCicdStore::new();
        let id = Uuid::new_v4();
        store
            .seed_instance(CicdInstance {
                id,
                tenant_id: "acme".to_string(),
                name: Some("old".to_string()),
                url: None,
                instance_type: "jenkins".to_string(),
                integration_id: Some("42".to_string()),
            })
            .await;

        store
            .upsert_instance(NewCicdInstance {
                id,
                tenant_id: "acme".to_string(),
                name: Some("new".to_string()),
                url: Some("https://ci.acme.io".to_string()),
                instance_type: "jenkins".to_string(),
            })
            .await
            .unwrap();

        let instance = store.instance(id).await.unwrap();
        assert_eq!(instance.name.as_deref(), Some("new"));
        assert_eq!(instance.integration_id.as_deref(), Some("42"));
    }
}
