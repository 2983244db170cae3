//! cicd.job.run: One execution of a job.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::cicd_job_runs;

/// Where a job run row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobRunSource {
    JobRunCompleteEvent,
    Analytics,
}

impl JobRunSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunSource::JobRunCompleteEvent => "JOB_RUN_COMPLETE_EVENT",
            JobRunSource::Analytics => "ANALYTICS",
        }
    }
}

pub const UNKNOWN_USER: &str = "UNKNOWN";

#[derive(Debug, Clone, Insertable, Serialize)]
#[diesel(table_name = cicd_job_runs)]
pub struct CicdJobRun {
    pub id: Uuid,
    pub tenant_id: String,
    pub cicd_job_id: Uuid,
    pub job_run_number: i64,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Whole seconds.
    pub duration: i32,
    pub cicd_user_id: Option<String>,
    pub ci: bool,
    pub cd: bool,
    pub source: String,
    /// Id of the notification that produced the row.
    pub reference_id: String,
    pub scm_commit_ids: Vec<String>,
    pub triggers: serde_json::Value,
    pub params: serde_json::Value,
    pub log_path: Option<String>,
}
