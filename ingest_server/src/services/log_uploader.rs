//! Copies node logs from the unpacked result bundle into object storage.

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::BlobStore;

const LOG_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    JobRun,
    Stage,
    Step,
}

impl LogKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            LogKind::JobRun => "cicd-job-run-logs",
            LogKind::Stage => "cicd-job-run-stage-logs",
            LogKind::Step => "cicd-job-run-stage-step-logs",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::JobRun => "job_run",
            LogKind::Stage => "stage",
            LogKind::Step => "step",
        }
    }
}

/// `{prefix}/tenant-{tenant}/{yyyy}/{MM}/{dd}/{node-id}`
pub fn log_path(kind: LogKind, tenant: &str, date: DateTime<Utc>, node_id: Uuid) -> String {
    format!(
        "{}/tenant-{}/{}/{}",
        kind.prefix(),
        tenant,
        date.format("%Y/%m/%d"),
        node_id
    )
}

/// Resolve a log reference inside `unpacked_dir`.
///
/// Returns `None` for blank, absolute or parent-escaping references and for
/// files that do not exist.
pub fn resolve_log(unpacked_dir: Option<&Path>, reference: Option<&str>) -> Option<PathBuf> {
    let dir = unpacked_dir?;
    let reference = reference.map(str::trim).filter(|r| !r.is_empty())?;
    let relative = Path::new(reference);
    let confined = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !confined {
        tracing::warn!(reference, "Ignoring log reference outside the result bundle");
        return None;
    }
    let full = dir.join(relative);
    full.is_file().then_some(full)
}

/// Upload the log referenced by a node.
///
/// `Ok(None)` when the node has no log or the file is absent; that is not an
/// error. `Ok(Some(path))` carries the storage path of the uploaded log.
pub async fn upload_log(
    blobs: &dyn BlobStore,
    tenant: &str,
    kind: LogKind,
    node_id: Uuid,
    unpacked_dir: Option<&Path>,
    reference: Option<&str>,
) -> anyhow::Result<Option<String>> {
    let Some(file) = resolve_log(unpacked_dir, reference) else {
        return Ok(None);
    };

    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read log {}", file.display()))?;
    let path = log_path(kind, tenant, Utc::now(), node_id);
    blobs
        .put(&path, Bytes::from(bytes), LOG_CONTENT_TYPE)
        .await
        .with_context(|| format!("failed to upload {} log {node_id}", kind.as_str()))?;

    crate::metrics::log_uploaded(kind.as_str());
    tracing::debug!(kind = kind.as_str(), node_id = %node_id, path = %path, "Log uploaded");
    Ok(Some(path))
}
