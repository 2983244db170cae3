//! cicd.job.run.stage.step: Leaf step inside a stage.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::cicd_job_run_stage_steps;

#[derive(Debug, Clone, Insertable, Serialize)]
#[diesel(table_name = cicd_job_run_stage_steps)]
pub struct JobRunStageStep {
    pub id: Uuid,
    pub tenant_id: String,
    pub cicd_job_run_stage_id: Uuid,
    pub step_id: String,
    pub display_name: String,
    pub display_description: String,
    pub result: String,
    pub state: String,
    pub duration: i32,
    pub start_time: DateTime<Utc>,
    pub log_path: Option<String>,
}
