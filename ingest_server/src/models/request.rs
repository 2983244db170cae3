//! Job-run-complete payloads: the notification and the JSON descriptor it points at.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactEntry;

/// Notification that a job run finished and its result bundle is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunCompleteNotification {
    pub tenant: String,
    pub message_id: String,
    pub task_id: Uuid,
    /// Archive-store path of the JSON descriptor.
    #[serde(default)]
    pub json_file_path: Option<String>,
    /// Archive-store path of the zipped result bundle (logs, reports).
    #[serde(default)]
    pub result_file_path: Option<String>,
}

/// The JSON descriptor of a completed job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunRequest {
    #[serde(rename = "jenkins_instance_guid")]
    pub instance_id: Uuid,
    #[serde(rename = "jenkins_instance_name", default)]
    pub instance_name: Option<String>,
    #[serde(rename = "jenkins_instance_url", default)]
    pub instance_url: Option<String>,
    pub job_name: String,
    pub job_full_name: String,
    #[serde(default)]
    pub job_normalized_full_name: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub scm_user_id: Option<String>,
    /// Triggering user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Milliseconds.
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub build_number: i64,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub ci: bool,
    #[serde(default)]
    pub cd: bool,
    #[serde(default)]
    pub scm_commit_ids: Vec<String>,
    #[serde(default)]
    pub trigger_chain: Vec<JobTrigger>,
    #[serde(default)]
    pub job_run_params: Vec<JobRunParam>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
    /// Root of the execution tree.
    #[serde(default)]
    pub job_run: Option<JobRunNode>,
}

impl JobRunRequest {
    /// Parse and validate a descriptor.
    pub fn from_json(bytes: &[u8]) -> Result<Self, crate::error::IngestError> {
        let request: Self = serde_json::from_slice(bytes)?;
        if request.job_full_name.trim().is_empty() {
            return Err(crate::error::IngestError::InvalidDescriptor(
                "job_full_name is empty".to_string(),
            ));
        }
        Ok(request)
    }
}

/// One link in the chain of events that triggered the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobTrigger {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub build_number: Option<String>,
    #[serde(default)]
    pub direct_parents: Vec<JobTrigger>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunParam {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// A job run inside the execution tree. The root node describes the run of
/// the request itself; nested nodes are child job runs triggered from a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRunNode {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub job_normalized_full_name: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub duration_in_millis: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    /// Path of the run's log inside the unpacked result bundle.
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub stages: Vec<StageNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageNode {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_description: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub duration_in_millis: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepNode>,
    #[serde(default)]
    pub child_job_runs: Vec<JobRunNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepNode {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_description: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub duration_in_millis: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_descriptor() {
        let json = br#"{
            "jenkins_instance_guid": "5f0c1d9e-8a57-4f2c-9a0e-0b1c2d3e4f50",
            "job_name": "build",
            "job_full_name": "folder/build",
            "start_time": 1600000000000
        }"#;

        let request = JobRunRequest::from_json(json).unwrap();
        assert_eq!(request.job_full_name, "folder/build");
        assert_eq!(request.duration, 0);
        assert!(request.job_run.is_none());
        assert!(request.artifacts.is_empty());
    }

    #[test]
    fn test_parse_nested_tree() {
        let json = br#"{
            "jenkins_instance_guid": "5f0c1d9e-8a57-4f2c-9a0e-0b1c2d3e4f50",
            "job_name": "deploy",
            "job_full_name": "deploy",
            "start_time": 1600000000000,
            "duration": 5000,
            "job_run": {
                "id": "12",
                "stages": [{
                    "id": "6",
                    "display_name": "Build",
                    "steps": [{"id": "7", "display_name": "sh"}],
                    "child_job_runs": [{"id": "3", "job_normalized_full_name": "lib/build"}]
                }]
            }
        }"#;

        let request = JobRunRequest::from_json(json).unwrap();
        let root = request.job_run.unwrap();
        assert_eq!(root.stages.len(), 1);
        assert_eq!(root.stages[0].steps.len(), 1);
        assert_eq!(
            root.stages[0].child_job_runs[0].job_normalized_full_name.as_deref(),
            Some("lib/build")
        );
    }

    #[test]
    fn test_rejects_bad_instance_id() {
        let json = br#"{
            "jenkins_instance_guid": "not-a-uuid",
            "job_name": "build",
            "job_full_name": "build",
            "start_time": 0
        }"#;
        assert!(JobRunRequest::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_blank_full_name() {
        let json = br#"{
            "jenkins_instance_guid": "5f0c1d9e-8a57-4f2c-9a0e-0b1c2d3e4f50",
            "job_name": "build",
            "job_full_name": "  ",
            "start_time": 0
        }"#;
        assert!(JobRunRequest::from_json(json).is_err());
    }
}
