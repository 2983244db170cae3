//! cicd.job.run.test: One test case result of a job run.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::cicd_job_run_tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "PASSED",
            TestStatus::Failed => "FAILED",
            TestStatus::Error => "ERROR",
            TestStatus::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Insertable, Serialize)]
#[diesel(table_name = cicd_job_run_tests)]
pub struct TestRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub cicd_job_run_id: Uuid,
    pub test_suite: String,
    pub test_name: String,
    pub status: String,
    /// Seconds.
    pub duration: f64,
    pub error_details: Option<String>,
    pub error_stacktrace: Option<String>,
}

/// `<testsuites>` wrapper document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JUnitTestSuites {
    #[serde(rename = "testsuite", default)]
    pub suites: Vec<JUnitTestSuite>,
}

/// `<testsuite>` element.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JUnitTestSuite {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "testcase", default)]
    pub cases: Vec<JUnitTestCase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JUnitTestCase {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "@classname", default)]
    pub class_name: Option<String>,
    #[serde(rename = "@time", default)]
    pub time: Option<String>,
    #[serde(default)]
    pub failure: Option<JUnitProblem>,
    #[serde(default)]
    pub error: Option<JUnitProblem>,
    #[serde(default)]
    pub skipped: Option<JUnitProblem>,
}

/// Body of a `<failure>`, `<error>` or `<skipped>` element.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JUnitProblem {
    #[serde(rename = "@message", default)]
    pub message: Option<String>,
    #[serde(rename = "$text", default)]
    pub text: Option<String>,
}

impl JUnitTestCase {
    pub fn status(&self) -> TestStatus {
        if self.error.is_some() {
            TestStatus::Error
        } else if self.failure.is_some() {
            TestStatus::Failed
        } else if self.skipped.is_some() {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        }
    }

    /// Duration in seconds; tolerates thousands separators.
    pub fn duration_secs(&self) -> f64 {
        self.time
            .as_deref()
            .map(|t| t.trim().replace(',', ""))
            .and_then(|t| t.parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    fn problem(&self) -> Option<&JUnitProblem> {
        self.error.as_ref().or(self.failure.as_ref())
    }
}

impl JUnitTestSuite {
    /// Flatten the suite into rows for one job run.
    pub fn into_records(self, tenant: &str, job_run_id: Uuid) -> Vec<TestRecord> {
        let suite_name = self.name.unwrap_or_default();
        self.cases
            .into_iter()
            .filter_map(|case| {
                let test_name = case.name.clone()?;
                let problem = case.problem();
                Some(TestRecord {
                    id: Uuid::new_v4(),
                    tenant_id: tenant.to_string(),
                    cicd_job_run_id: job_run_id,
                    test_suite: case
                        .class_name
                        .clone()
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| suite_name.clone()),
                    test_name,
                    status: case.status().as_str().to_string(),
                    duration: case.duration_secs(),
                    error_details: problem.and_then(|p| p.message.clone()),
                    error_stacktrace: problem.and_then(|p| p.text.clone()),
                })
            })
            .collect()
    }
}
