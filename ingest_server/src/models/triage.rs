//! Log-triage fan-out message, published once per uploaded log.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageMessage {
    pub company: String,
    pub instance_id: Uuid,
    pub instance_name: Option<String>,
    pub job_id: Uuid,
    pub job_name: String,
    pub job_run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<Uuid>,
    pub job_status: String,
    pub url: String,
    pub log_bucket: String,
    pub log_location: String,
}
