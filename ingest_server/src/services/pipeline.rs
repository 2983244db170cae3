//! Job-run-complete processing: one notification in, rows, logs and triage
//! messages out.
//!
//! [`Pipeline::process_job_run_complete`] persists an already-parsed request
//! against an unpacked result bundle. [`Pipeline::process_notification`] wraps
//! it with task bookkeeping, descriptor download and bundle extraction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use super::archive;
use super::coverage_importer::{CoverageContext, CoverageImportSummary, CoverageImporter};
use super::test_importer::{TestImportSummary, TestImporter};
use super::tree_builder::{TreeBuilder, TreeOutcome, Walk};
use super::triage_dispatcher::TriageDispatcher;
use crate::error::{IngestError, RecoverableError};
use crate::models::request::{JobRunCompleteNotification, JobRunRequest};
use crate::models::task::TaskStatus;
use crate::store::{BlobStore, CicdStore, CoverageConverter, EventBus, TriageCounter};

/// What one request produced, including everything that was skipped.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub instance_id: Uuid,
    pub job_id: Uuid,
    pub job_run_id: Uuid,
    pub tree: TreeOutcome,
    pub coverage: CoverageImportSummary,
    pub tests: TestImportSummary,
}

impl IngestReport {
    pub fn skipped(&self) -> impl Iterator<Item = &RecoverableError> {
        self.tree
            .skipped
            .iter()
            .chain(self.coverage.skipped.iter())
            .chain(self.tests.skipped.iter())
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn CicdStore>,
    /// Descriptors and result bundles are read from here.
    archives: Arc<dyn BlobStore>,
    /// Node logs are written here.
    logs: Arc<dyn BlobStore>,
    bus: Arc<dyn EventBus>,
    counter: Arc<dyn TriageCounter>,
    converter: Option<Arc<dyn CoverageConverter>>,
    triage_topic: String,
    /// Parent of per-notification working directories; the system temp dir when unset.
    work_root: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn CicdStore>,
        archives: Arc<dyn BlobStore>,
        logs: Arc<dyn BlobStore>,
        bus: Arc<dyn EventBus>,
        counter: Arc<dyn TriageCounter>,
        triage_topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            archives,
            logs,
            bus,
            counter,
            converter: None,
            triage_topic: triage_topic.into(),
            work_root: None,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn CoverageConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Persist one job-run request.
    ///
    /// Only instance, root job and root run failures are returned as errors;
    /// everything below them is reported in [`IngestReport`]. Re-processing
    /// the same request writes new run, stage and step rows.
    pub async fn process_job_run_complete(
        &self,
        tenant: &str,
        message_id: &str,
        request: &JobRunRequest,
        unpacked_dir: Option<&Path>,
    ) -> Result<IngestReport, IngestError> {
        let walk = Walk {
            tenant,
            message_id,
            instance_id: request.instance_id,
            instance_name: request.instance_name.as_deref(),
            instance_url: request.instance_url.as_deref(),
            unpacked_dir,
        };
        let triage = TriageDispatcher::new(self.bus.as_ref(), self.counter.as_ref(), &self.triage_topic);
        let builder = TreeBuilder::new(self.store.as_ref(), self.logs.as_ref(), triage);

        let mut tree = TreeOutcome::default();
        let root = builder.persist_root(&walk, request, &mut tree).await?;
        let job_run_id = root.scope.job_run_id;

        let mut report = IngestReport {
            instance_id: root.instance_id,
            job_id: root.scope.job_id,
            job_run_id,
            ..IngestReport::default()
        };

        if let Some(dir) = unpacked_dir {
            report.tests = TestImporter::new(self.store.as_ref())
                .import(tenant, job_run_id, dir)
                .await;
            let ctx = CoverageContext {
                tenant,
                job_run_id,
                job_name: &request.job_name,
                reference_id: message_id,
            };
            report.coverage = CoverageImporter::new(self.store.as_ref(), self.converter.as_deref())
                .import(&ctx, dir)
                .await;
        }

        builder
            .persist_tree(&walk, &root, request.job_run.as_ref(), &mut tree)
            .await;
        report.tree = tree;

        tracing::info!(
            job_run_id = %job_run_id,
            job_runs = report.tree.job_runs,
            stages = report.tree.stages,
            steps = report.tree.steps,
            logs = report.tree.logs_uploaded,
            triage = report.tree.triage_published,
            tests = report.tests.persisted,
            coverage = report.coverage.inserted,
            skipped = report.skipped_count(),
            "Job run ingested"
        );
        Ok(report)
    }

    /// Handle a notification end to end and record its task status.
    pub async fn process_notification(
        &self,
        notification: &JobRunCompleteNotification,
    ) -> Result<IngestReport, IngestError> {
        let span = tracing::info_span!(
            "job_run_complete",
            tenant = %notification.tenant,
            message_id = %notification.message_id,
            task_id = %notification.task_id,
        );
        async {
            self.mark_task(&notification.tenant, notification.task_id, TaskStatus::Pending, true)
                .await;

            let result = self.run_notification(notification).await;
            match &result {
                Ok(_) => {
                    self.mark_task(&notification.tenant, notification.task_id, TaskStatus::Success, false)
                        .await
                }
                Err(e) => {
                    tracing::error!(error = %e, "Job run ingestion failed");
                    self.mark_task(&notification.tenant, notification.task_id, TaskStatus::Failure, false)
                        .await
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Record task status; failures are logged only.
    pub async fn mark_task(&self, tenant: &str, task_id: Uuid, status: TaskStatus, bump_attempt: bool) {
        if let Err(e) = self
            .store
            .update_task_status(tenant, task_id, status, bump_attempt)
            .await
        {
            tracing::error!(task_id = %task_id, status = %status, error = %e, "Failed to update task status");
        }
    }

    async fn run_notification(
        &self,
        notification: &JobRunCompleteNotification,
    ) -> Result<IngestReport, IngestError> {
        let tenant = notification.tenant.as_str();
        let descriptor_path = notification
            .json_file_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(IngestError::MissingDescriptor)?;

        let descriptor = self
            .archives
            .get(descriptor_path)
            .await
            .map_err(|source| IngestError::DescriptorDownload {
                path: descriptor_path.to_string(),
                source,
            })?;
        let request = JobRunRequest::from_json(&descriptor)?;

        let instance = self
            .store
            .get_instance(tenant, request.instance_id)
            .await
            .map_err(|source| IngestError::Instance {
                instance_id: request.instance_id,
                source,
            })?
            .ok_or(IngestError::UnknownInstance(request.instance_id))?;
        if !matches!(instance.integration_id.as_deref(), Some(id) if !id.trim().is_empty()) {
            return Err(IngestError::InstanceNotLinked(instance.id));
        }

        // Removed on drop, whichever way this returns.
        let mut builder = tempfile::Builder::new();
        builder.prefix("job-run-complete-");
        let workdir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(IngestError::WorkingDirectory)?;
        let unpacked = match notification
            .result_file_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            Some(path) => self.unpack_results(path, workdir.path()).await,
            None => None,
        };

        self.process_job_run_complete(tenant, &notification.message_id, &request, unpacked)
            .await
    }

    /// Download and extract the result bundle; `None` when it is unusable.
    async fn unpack_results<'d>(&self, path: &str, dest: &'d Path) -> Option<&'d Path> {
        let bytes = match self.archives.get(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path, error = %e, "Result bundle download failed, continuing with descriptor only");
                return None;
            }
        };
        match archive::extract_bytes(bytes, dest).await {
            Ok(files) => {
                tracing::debug!(path, files = files.len(), "Result bundle extracted");
                Some(dest)
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "Result bundle extraction failed, continuing with descriptor only");
                None
            }
        }
    }
}
