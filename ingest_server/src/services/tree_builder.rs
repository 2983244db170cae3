//! Job-run tree persistence.
//!
//! Turns a [`JobRunRequest`] into Instance / Job / JobRun / Stage / Step rows.
//! The root job is upserted; jobs of nested child runs are only looked up by
//! normalized full name. Every stage carries its full path of ancestor
//! stages, built by value so a parent's path is never shared with children.
//!
//! Failures below the root run are recorded as [`RecoverableError`]s and
//! skip only the affected subtree.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use super::log_uploader::{self, LogKind};
use super::triage_dispatcher::{DispatchOutcome, TriageDispatcher};
use super::urls;
use crate::error::{IngestError, NodeKind, RecoverableError};
use crate::models::artifact::CicdJobRunArtifact;
use crate::models::instance::{NewCicdInstance, INSTANCE_TYPE_JENKINS};
use crate::models::job::{sanitize_scm_url, CicdJob};
use crate::models::job_run::{CicdJobRun, JobRunSource, UNKNOWN_USER};
use crate::models::request::{JobRunNode, JobRunRequest, JobTrigger, StageNode, StepNode};
use crate::models::stage::{JobRunStage, StagePath};
use crate::models::step::JobRunStageStep;
use crate::models::triage::TriageMessage;
use crate::store::{BlobStore, CicdStore};

const UNKNOWN: &str = "UNKNOWN";
const NAME_MAX_LEN: usize = 50;
const DESCRIPTION_MAX_LEN: usize = 200;

/// Shorten `value` to at most `max` characters by replacing its middle with `...`.
pub fn abbreviate_middle(value: &str, max: usize) -> String {
    const MIDDLE: &str = "...";
    let len = value.chars().count();
    if len <= max || max <= MIDDLE.len() {
        return value.to_string();
    }
    let keep = max - MIDDLE.len();
    let head = keep / 2 + keep % 2;
    let tail = keep / 2;
    let start: String = value.chars().take(head).collect();
    let end: String = value.chars().skip(len - tail).collect();
    format!("{start}{MIDDLE}{end}")
}

/// `start + duration_secs`, or `None` past the end of the representable range.
pub fn run_end_time(start: DateTime<Utc>, duration_secs: i32) -> Option<DateTime<Utc>> {
    start.checked_add_signed(Duration::seconds(i64::from(duration_secs)))
}

/// Whole seconds, truncating.
pub fn millis_to_secs(millis: i64) -> i32 {
    i32::try_from(millis / 1000).unwrap_or(if millis < 0 { i32::MIN } else { i32::MAX })
}

/// Parse an ISO-8601 node timestamp (RFC 3339 or the `+0000` offset form).
pub fn parse_node_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn node_time_or(raw: Option<&str>, inherited: DateTime<Utc>) -> DateTime<Utc> {
    match parse_node_time(raw) {
        Some(parsed) => parsed,
        None => {
            if raw.is_some_and(|r| !r.trim().is_empty()) {
                tracing::debug!(raw, "Unparseable node start time, inheriting from parent");
            }
            inherited
        }
    }
}

fn or_unknown(value: Option<&str>) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Identity of the run whose stages are being persisted.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub job_id: Uuid,
    pub job_name: String,
    pub job_full_name: String,
    pub job_run_id: Uuid,
    pub run_number: i64,
    pub status: String,
    pub start_time: DateTime<Utc>,
}

/// Per-request values shared by every node of the walk.
#[derive(Debug, Clone, Copy)]
pub struct Walk<'a> {
    pub tenant: &'a str,
    pub message_id: &'a str,
    pub instance_id: Uuid,
    pub instance_name: Option<&'a str>,
    pub instance_url: Option<&'a str>,
    pub unpacked_dir: Option<&'a Path>,
}

/// Counters and skips accumulated over one tree.
#[derive(Debug, Default)]
pub struct TreeOutcome {
    pub job_runs: usize,
    pub stages: usize,
    pub steps: usize,
    pub artifacts: usize,
    pub logs_uploaded: usize,
    pub log_upload_failures: usize,
    pub triage_published: usize,
    pub skipped: Vec<RecoverableError>,
}

impl TreeOutcome {
    fn skip(&mut self, error: RecoverableError) {
        crate::metrics::subtree_skipped(error.reason());
        tracing::warn!(error = %error, "Subtree skipped");
        self.skipped.push(error);
    }
}

/// The persisted root of a request.
#[derive(Debug, Clone)]
pub struct RootRun {
    pub instance_id: Uuid,
    pub scope: RunScope,
}

pub struct TreeBuilder<'a> {
    store: &'a dyn CicdStore,
    blobs: &'a dyn BlobStore,
    triage: TriageDispatcher<'a>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(store: &'a dyn CicdStore, blobs: &'a dyn BlobStore, triage: TriageDispatcher<'a>) -> Self {
        Self {
            store,
            blobs,
            triage,
        }
    }

    /// Persist the instance, the root job and the root run with its
    /// artifacts and log. Any failure here is fatal for the request.
    pub async fn persist_root(
        &self,
        walk: &Walk<'_>,
        request: &JobRunRequest,
        outcome: &mut TreeOutcome,
    ) -> Result<RootRun, IngestError> {
        let start_time = DateTime::<Utc>::from_timestamp_millis(request.start_time).ok_or_else(|| {
            IngestError::InvalidDescriptor(format!("start_time {} is out of range", request.start_time))
        })?;
        let duration = millis_to_secs(request.duration);
        let end_time = run_end_time(start_time, duration).ok_or_else(|| {
            IngestError::InvalidDescriptor(format!(
                "start_time {} plus duration {}s is out of range",
                request.start_time, duration
            ))
        })?;

        let instance_id = self
            .store
            .upsert_instance(NewCicdInstance {
                id: request.instance_id,
                tenant_id: walk.tenant.to_string(),
                name: request.instance_name.clone(),
                url: request.instance_url.clone(),
                instance_type: INSTANCE_TYPE_JENKINS.to_string(),
            })
            .await
            .map_err(|source| IngestError::Instance {
                instance_id: request.instance_id,
                source,
            })?;

        let job_id = self
            .store
            .upsert_job(CicdJob {
                id: Uuid::new_v4(),
                tenant_id: walk.tenant.to_string(),
                cicd_instance_id: instance_id,
                job_name: request.job_name.clone(),
                job_full_name: request.job_full_name.clone(),
                job_normalized_full_name: request.job_normalized_full_name.clone(),
                branch_name: request.branch_name.clone(),
                module_name: request.module_name.clone(),
                scm_url: request.repo_url.as_deref().map(sanitize_scm_url),
                scm_user_id: request.scm_user_id.clone(),
            })
            .await
            .map_err(|source| IngestError::RootJob {
                job_full_name: request.job_full_name.clone(),
                source,
            })?;

        let mut triggers: Vec<&JobTrigger> = Vec::new();
        for trigger in &request.trigger_chain {
            if !triggers.contains(&trigger) {
                triggers.push(trigger);
            }
        }
        let triggers = serde_json::to_value(&triggers).map_err(|e| IngestError::RootJobRun(e.into()))?;
        let params =
            serde_json::to_value(&request.job_run_params).map_err(|e| IngestError::RootJobRun(e.into()))?;

        let status = or_unknown(request.result.as_deref());
        let job_run_id = self
            .store
            .insert_job_run(CicdJobRun {
                id: Uuid::new_v4(),
                tenant_id: walk.tenant.to_string(),
                cicd_job_id: job_id,
                job_run_number: request.build_number,
                status: status.clone(),
                start_time,
                end_time,
                duration,
                cicd_user_id: request.user_id.clone(),
                ci: request.ci,
                cd: request.cd,
                source: JobRunSource::JobRunCompleteEvent.as_str().to_string(),
                reference_id: walk.message_id.to_string(),
                scm_commit_ids: request.scm_commit_ids.clone(),
                triggers,
                params,
                log_path: None,
            })
            .await
            .map_err(IngestError::RootJobRun)?;

        outcome.job_runs += 1;
        crate::metrics::job_run_persisted();
        tracing::info!(
            job_id = %job_id,
            job_run_id = %job_run_id,
            job_full_name = %request.job_full_name,
            build_number = request.build_number,
            "Root job run persisted"
        );

        let scope = RunScope {
            job_id,
            job_name: request.job_name.clone(),
            job_full_name: request.job_full_name.clone(),
            job_run_id,
            run_number: request.build_number,
            status,
            start_time,
        };

        if !request.artifacts.is_empty() {
            let artifacts: Vec<CicdJobRunArtifact> = request
                .artifacts
                .iter()
                .map(|entry| CicdJobRunArtifact::from_entry(walk.tenant, job_run_id, entry))
                .collect();
            match self.store.insert_artifacts(artifacts).await {
                Ok(written) => outcome.artifacts += written,
                Err(e) => outcome.skip(RecoverableError::Artifacts(e)),
            }
        }

        let root_log = request.job_run.as_ref().and_then(|node| node.log.as_deref());
        self.job_run_log(walk, &scope, root_log, outcome).await;

        Ok(RootRun { instance_id, scope })
    }

    /// Persist the stages of the root node and everything below them.
    pub async fn persist_tree(
        &self,
        walk: &Walk<'_>,
        root: &RootRun,
        node: Option<&JobRunNode>,
        outcome: &mut TreeOutcome,
    ) {
        let Some(node) = node else {
            tracing::debug!("Descriptor has no job run tree");
            return;
        };
        let root_path = StagePath::root();
        for stage in &node.stages {
            self.persist_stage(walk, &root.scope, stage, &root_path, outcome).await;
        }
    }

    async fn job_run_log(
        &self,
        walk: &Walk<'_>,
        scope: &RunScope,
        reference: Option<&str>,
        outcome: &mut TreeOutcome,
    ) {
        let Some(path) = self
            .upload(walk, LogKind::JobRun, scope.job_run_id, reference, outcome)
            .await
        else {
            return;
        };
        if let Err(e) = self
            .store
            .set_job_run_log_path(walk.tenant, scope.job_run_id, &path)
            .await
        {
            tracing::error!(job_run_id = %scope.job_run_id, error = %e, "Failed to record job run log path");
        }
        let url = urls::job_run_url(walk.instance_url, &scope.job_full_name, scope.run_number);
        self.dispatch(self.triage_message(walk, scope, None, None, url, path), outcome)
            .await;
    }

    async fn upload(
        &self,
        walk: &Walk<'_>,
        kind: LogKind,
        node_id: Uuid,
        reference: Option<&str>,
        outcome: &mut TreeOutcome,
    ) -> Option<String> {
        match log_uploader::upload_log(self.blobs, walk.tenant, kind, node_id, walk.unpacked_dir, reference)
            .await
        {
            Ok(Some(path)) => {
                outcome.logs_uploaded += 1;
                Some(path)
            }
            Ok(None) => None,
            Err(e) => {
                outcome.log_upload_failures += 1;
                crate::metrics::log_upload_failed(kind.as_str());
                tracing::error!(kind = kind.as_str(), node_id = %node_id, error = %e, "Failed to upload log");
                None
            }
        }
    }

    fn triage_message(
        &self,
        walk: &Walk<'_>,
        scope: &RunScope,
        stage_id: Option<Uuid>,
        step_id: Option<Uuid>,
        url: String,
        log_location: String,
    ) -> TriageMessage {
        TriageMessage {
            company: walk.tenant.to_string(),
            instance_id: walk.instance_id,
            instance_name: walk.instance_name.map(str::to_string),
            job_id: scope.job_id,
            job_name: scope.job_name.clone(),
            job_run_id: scope.job_run_id,
            stage_id,
            step_id,
            job_status: scope.status.clone(),
            url,
            log_bucket: self.blobs.bucket().to_string(),
            log_location,
        }
    }

    async fn dispatch(&self, message: TriageMessage, outcome: &mut TreeOutcome) {
        if self.triage.dispatch(&message).await == DispatchOutcome::Published {
            outcome.triage_published += 1;
        }
    }

    async fn persist_stage(
        &self,
        walk: &Walk<'_>,
        scope: &RunScope,
        stage: &StageNode,
        parent_path: &StagePath,
        outcome: &mut TreeOutcome,
    ) {
        let Some(node_id) = stage.id.as_deref().filter(|id| !id.trim().is_empty()) else {
            outcome.skip(RecoverableError::MissingId(NodeKind::Stage));
            return;
        };

        let stage_uuid = Uuid::new_v4();
        let display_name = stage.display_name.clone().unwrap_or_default();
        let path = parent_path.with_stage(stage_uuid, &display_name);
        let start_time = node_time_or(stage.start_time.as_deref(), scope.start_time);

        let log_path = self
            .upload(walk, LogKind::Stage, stage_uuid, stage.log.as_deref(), outcome)
            .await;
        let url = urls::stage_url(walk.instance_url, &scope.job_full_name, scope.run_number, node_id);

        let row = JobRunStage {
            id: stage_uuid,
            tenant_id: walk.tenant.to_string(),
            cicd_job_run_id: scope.job_run_id,
            stage_id: node_id.to_string(),
            name: abbreviate_middle(&display_name, NAME_MAX_LEN),
            description: abbreviate_middle(
                stage.display_description.as_deref().unwrap_or_default(),
                DESCRIPTION_MAX_LEN,
            ),
            result: or_unknown(stage.result.as_deref()),
            state: or_unknown(stage.state.as_deref()),
            duration: millis_to_secs(stage.duration_in_millis),
            start_time,
            logs: log_path.clone().unwrap_or_default(),
            url: url.clone(),
            full_path: path.clone(),
            child_job_runs: Vec::new(),
        };
        if let Err(source) = self.store.insert_stage(row).await {
            outcome.skip(RecoverableError::Persist {
                kind: NodeKind::Stage,
                node_id: node_id.to_string(),
                source,
            });
            return;
        }
        outcome.stages += 1;
        tracing::debug!(
            job_run_id = %scope.job_run_id,
            stage_id = %stage_uuid,
            node_id,
            depth = path.len(),
            "Stage persisted"
        );

        for step in &stage.steps {
            self.persist_step(walk, scope, stage_uuid, &url, start_time, step, outcome)
                .await;
        }

        let mut child_ids = Vec::new();
        for child in &stage.child_job_runs {
            if let Some(id) = self
                .persist_child_run(walk, child, &path, start_time, outcome)
                .await
            {
                child_ids.push(id);
            }
        }
        if !child_ids.is_empty() {
            if let Err(source) = self
                .store
                .set_stage_child_job_runs(walk.tenant, stage_uuid, &child_ids)
                .await
            {
                outcome.skip(RecoverableError::Persist {
                    kind: NodeKind::Stage,
                    node_id: node_id.to_string(),
                    source,
                });
            }
        }

        if let Some(log_path) = log_path {
            let message = self.triage_message(walk, scope, Some(stage_uuid), None, url, log_path);
            self.dispatch(message, outcome).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_step(
        &self,
        walk: &Walk<'_>,
        scope: &RunScope,
        stage_uuid: Uuid,
        stage_url: &str,
        stage_start: DateTime<Utc>,
        step: &StepNode,
        outcome: &mut TreeOutcome,
    ) {
        let Some(node_id) = step.id.as_deref().filter(|id| !id.trim().is_empty()) else {
            outcome.skip(RecoverableError::MissingId(NodeKind::Step));
            return;
        };

        let step_uuid = Uuid::new_v4();
        let row = JobRunStageStep {
            id: step_uuid,
            tenant_id: walk.tenant.to_string(),
            cicd_job_run_stage_id: stage_uuid,
            step_id: node_id.to_string(),
            display_name: abbreviate_middle(step.display_name.as_deref().unwrap_or_default(), NAME_MAX_LEN),
            display_description: abbreviate_middle(
                step.display_description.as_deref().unwrap_or_default(),
                NAME_MAX_LEN,
            ),
            result: or_unknown(step.result.as_deref()),
            state: or_unknown(step.state.as_deref()),
            duration: millis_to_secs(step.duration_in_millis),
            start_time: node_time_or(step.start_time.as_deref(), stage_start),
            log_path: None,
        };
        if let Err(source) = self.store.insert_step(row).await {
            outcome.skip(RecoverableError::Persist {
                kind: NodeKind::Step,
                node_id: node_id.to_string(),
                source,
            });
            return;
        }
        outcome.steps += 1;

        let Some(log_path) = self
            .upload(walk, LogKind::Step, step_uuid, step.log.as_deref(), outcome)
            .await
        else {
            return;
        };
        if let Err(e) = self
            .store
            .set_step_log_path(walk.tenant, step_uuid, &log_path)
            .await
        {
            tracing::error!(step_id = %step_uuid, error = %e, "Failed to record step log path");
        }
        let message = self.triage_message(
            walk,
            scope,
            Some(stage_uuid),
            Some(step_uuid),
            stage_url.to_string(),
            log_path,
        );
        self.dispatch(message, outcome).await;
    }

    /// Persist a nested child run; `None` when its subtree was skipped.
    fn persist_child_run<'b>(
        &'b self,
        walk: &'b Walk<'b>,
        node: &'b JobRunNode,
        parent_path: &'b StagePath,
        parent_start: DateTime<Utc>,
        outcome: &'b mut TreeOutcome,
    ) -> BoxFuture<'b, Option<Uuid>> {
        async move {
            match self
                .child_run(walk, node, parent_path, parent_start, outcome)
                .await
            {
                Ok(id) => Some(id),
                Err(error) => {
                    outcome.skip(error);
                    None
                }
            }
        }
        .boxed()
    }

    async fn child_run(
        &self,
        walk: &Walk<'_>,
        node: &JobRunNode,
        parent_path: &StagePath,
        parent_start: DateTime<Utc>,
        outcome: &mut TreeOutcome,
    ) -> Result<Uuid, RecoverableError> {
        let node_id = node
            .id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(RecoverableError::MissingId(NodeKind::JobRun))?;
        let normalized_name = node
            .job_normalized_full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| RecoverableError::MissingJobName {
                node_id: node_id.to_string(),
            })?;
        let run_number: i64 = node_id
            .trim()
            .parse()
            .map_err(|_| RecoverableError::InvalidRunNumber {
                node_id: node_id.to_string(),
            })?;

        let mut jobs = self
            .store
            .find_jobs_by_normalized_name(walk.tenant, walk.instance_id, normalized_name, 2)
            .await
            .map_err(|source| RecoverableError::ChildJobLookup {
                normalized_name: normalized_name.to_string(),
                source,
            })?;
        if jobs.len() != 1 {
            return Err(RecoverableError::UnresolvedChildJob {
                normalized_name: normalized_name.to_string(),
                matches: jobs.len(),
            });
        }
        let job = jobs.remove(0);

        let start_time = node_time_or(node.start_time.as_deref(), parent_start);
        let duration = millis_to_secs(node.duration_in_millis);
        let end_time = run_end_time(start_time, duration).ok_or_else(|| RecoverableError::TimeOutOfRange {
            node_id: node_id.to_string(),
        })?;
        let status = or_unknown(node.result.as_deref());
        let job_run_id = self
            .store
            .insert_job_run(CicdJobRun {
                id: Uuid::new_v4(),
                tenant_id: walk.tenant.to_string(),
                cicd_job_id: job.id,
                job_run_number: run_number,
                status: status.clone(),
                start_time,
                end_time,
                duration,
                cicd_user_id: Some(UNKNOWN_USER.to_string()),
                ci: false,
                cd: false,
                source: JobRunSource::JobRunCompleteEvent.as_str().to_string(),
                reference_id: walk.message_id.to_string(),
                scm_commit_ids: Vec::new(),
                triggers: serde_json::Value::Array(Vec::new()),
                params: serde_json::Value::Array(Vec::new()),
                log_path: None,
            })
            .await
            .map_err(|source| RecoverableError::Persist {
                kind: NodeKind::JobRun,
                node_id: node_id.to_string(),
                source,
            })?;
        outcome.job_runs += 1;
        crate::metrics::job_run_persisted();
        tracing::debug!(
            job_id = %job.id,
            job_run_id = %job_run_id,
            normalized_name,
            run_number,
            "Child job run persisted"
        );

        let scope = RunScope {
            job_id: job.id,
            job_name: job.job_name,
            job_full_name: job.job_full_name,
            job_run_id,
            run_number,
            status,
            start_time,
        };
        self.job_run_log(walk, &scope, node.log.as_deref(), outcome).await;

        for stage in &node.stages {
            self.persist_stage(walk, &scope, stage, parent_path, outcome).await;
        }
        Ok(job_run_id)
    }
}
