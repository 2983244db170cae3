//! cicd.job.run.stage: A stage of a job run, addressed by its hierarchical path.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::cicd_job_run_stages;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SegmentType {
    #[serde(rename = "CICD_STAGE")]
    Stage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathSegment {
    pub id: String,
    pub name: String,
    /// 1-based.
    pub position: i32,
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
}

/// Ordered ancestry of a stage, root first. Extending a path returns a new
/// value; parents never share storage with children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StagePath(Vec<PathSegment>);

impl StagePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path of a stage nested directly under this path.
    pub fn with_stage(&self, stage_id: Uuid, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment {
            id: stage_id.to_string(),
            name: name.to_string(),
            position: self.0.len() as i32 + 1,
            segment_type: SegmentType::Stage,
        });
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<StagePath> for serde_json::Value {
    fn from(path: StagePath) -> Self {
        serde_json::to_value(path.0).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Insertable, Serialize)]
#[diesel(table_name = cicd_job_run_stages)]
pub struct JobRunStage {
    pub id: Uuid,
    pub tenant_id: String,
    pub cicd_job_run_id: Uuid,
    /// Node id reported by the CI server.
    pub stage_id: String,
    pub name: String,
    pub description: String,
    pub result: String,
    pub state: String,
    pub duration: i32,
    pub start_time: DateTime<Utc>,
    /// Storage location of the stage log, empty when none was uploaded.
    pub logs: String,
    pub url: String,
    #[diesel(serialize_as = serde_json::Value)]
    pub full_path: StagePath,
    pub child_job_runs: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_positions_increase() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let parent = StagePath::root().with_stage(first, "Build");
        let child = parent.with_stage(second, "Compile");

        assert_eq!(parent.len(), 1);
        assert_eq!(child.len(), 2);
        let positions: Vec<i32> = child.segments().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(child.segments()[1].id, second.to_string());
    }

    #[test]
    fn test_extending_leaves_parent_untouched() {
        let parent = StagePath::root().with_stage(Uuid::new_v4(), "Build");
        let _a = parent.with_stage(Uuid::new_v4(), "a");
        let _b = parent.with_stage(Uuid::new_v4(), "b");
        assert_eq!(parent.len(), 1);
    }

    #[test]
    fn test_path_serializes_as_segment_list() {
        let id = Uuid::new_v4();
        let path = StagePath::root().with_stage(id, "Build");
        let value: serde_json::Value = path.into();
        assert_eq!(value[0]["type"], "CICD_STAGE");
        assert_eq!(value[0]["position"], 1);
        assert_eq!(value[0]["name"], "Build");
    }
}
