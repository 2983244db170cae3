//! cicd.job.run.artifact: Artifacts a job run consumed or produced.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::cicd_job_run_artifacts;

/// Artifact as reported in the job-run descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub output: bool,
    #[serde(rename = "type", default)]
    pub artifact_type: Option<String>,
    #[serde(default)]
    pub qualifier: Option<String>,
}

#[derive(Debug, Clone, Insertable, Serialize)]
#[diesel(table_name = cicd_job_run_artifacts)]
pub struct CicdJobRunArtifact {
    pub id: Uuid,
    pub tenant_id: String,
    pub cicd_job_run_id: Uuid,
    pub name: Option<String>,
    pub location: Option<String>,
    pub hash: Option<String>,
    pub input: bool,
    pub output: bool,
    pub artifact_type: Option<String>,
    pub qualifier: Option<String>,
}

impl CicdJobRunArtifact {
    pub fn from_entry(tenant: &str, job_run_id: Uuid, entry: &ArtifactEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            cicd_job_run_id: job_run_id,
            name: entry.name.clone(),
            location: entry.location.clone(),
            hash: entry.hash.clone(),
            input: entry.input,
            output: entry.output,
            artifact_type: entry.artifact_type.clone(),
            qualifier: entry.qualifier.clone(),
        }
    }
}
