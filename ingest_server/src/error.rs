//! Failure taxonomy for job-run ingestion.
//!
//! [`IngestError`] aborts a notification and marks its task FAILURE.
//! [`RecoverableError`] skips one subtree or file; the rest of the request
//! continues and the skip is counted in the [`IngestReport`](crate::services::pipeline::IngestReport).

use thiserror::Error;
use uuid::Uuid;

/// Fatal-for-request failures.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("notification has no descriptor path")]
    MissingDescriptor,

    #[error("failed to download descriptor {path}: {source}")]
    DescriptorDownload {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("unknown CI/CD instance {0}")]
    UnknownInstance(Uuid),

    #[error("CI/CD instance {0} has no associated integration")]
    InstanceNotLinked(Uuid),

    #[error("failed to persist instance {instance_id}: {source}")]
    Instance {
        instance_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist root job {job_full_name}: {source}")]
    RootJob {
        job_full_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist root job run: {0}")]
    RootJobRun(#[source] anyhow::Error),

    #[error("failed to prepare working directory: {0}")]
    WorkingDirectory(#[source] std::io::Error),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error("worker pool backlog is full ({0} notifications)")]
    QueueFull(usize),
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::InvalidDescriptor(e.to_string())
    }
}

/// Which kind of tree node a skip refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    JobRun,
    Stage,
    Step,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::JobRun => "job_run",
            NodeKind::Stage => "stage",
            NodeKind::Step => "step",
        }
    }
}

/// A unit of work that was skipped without failing the request.
#[derive(Debug, Error)]
pub enum RecoverableError {
    #[error("{} node has no id", .0.as_str())]
    MissingId(NodeKind),

    #[error("child job run {node_id} has no normalized job name")]
    MissingJobName { node_id: String },

    #[error("child job run {node_id} has a non-numeric id")]
    InvalidRunNumber { node_id: String },

    #[error("child job {normalized_name} matched {matches} jobs, expected exactly one")]
    UnresolvedChildJob {
        normalized_name: String,
        matches: usize,
    },

    #[error("child job run {node_id} ends outside the representable time range")]
    TimeOutOfRange { node_id: String },

    #[error("failed to look up child job {normalized_name}: {source}")]
    ChildJobLookup {
        normalized_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist {} {node_id}: {source}", .kind.as_str())]
    Persist {
        kind: NodeKind,
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist artifacts: {0}")]
    Artifacts(#[source] anyhow::Error),

    #[error("failed to import {file}: {reason}")]
    ReportFile { file: String, reason: String },

    #[error("failed to extract {archive}: {reason}")]
    Archive { archive: String, reason: String },
}

impl RecoverableError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            RecoverableError::MissingId(_) => "missing_id",
            RecoverableError::MissingJobName { .. } => "missing_job_name",
            RecoverableError::InvalidRunNumber { .. } => "invalid_run_number",
            RecoverableError::UnresolvedChildJob { .. } => "unresolved_child_job",
            RecoverableError::TimeOutOfRange { .. } => "time_out_of_range",
            RecoverableError::ChildJobLookup { .. } => "child_job_lookup",
            RecoverableError::Persist { .. } => "persist",
            RecoverableError::Artifacts(_) => "artifacts",
            RecoverableError::ReportFile { .. } => "report_file",
            RecoverableError::Archive { .. } => "archive",
        }
    }
}
