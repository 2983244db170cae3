//! JUnit test report import.

use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use uuid::Uuid;

use super::archive;
use crate::error::RecoverableError;
use crate::models::test_record::{JUnitTestSuite, JUnitTestSuites, TestRecord};
use crate::store::CicdStore;

pub const TEST_REPORT_ARCHIVE: &str = "levelops_junit_reports.zip";
pub const TEST_REPORT_DIR: &str = "levelops_junit_reports";

#[derive(Debug, Default)]
pub struct TestImportSummary {
    pub files_parsed: usize,
    pub persisted: usize,
    pub skipped: Vec<RecoverableError>,
}

/// Name of the document's root element, if any.
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Parse one report file, either a `<testsuites>` wrapper or a single `<testsuite>`.
pub fn parse_report(xml: &str) -> Result<Vec<JUnitTestSuite>, String> {
    match root_element(xml).as_deref() {
        Some("testsuites") => quick_xml::de::from_str::<JUnitTestSuites>(xml)
            .map(|doc| doc.suites)
            .map_err(|e| e.to_string()),
        Some("testsuite") => quick_xml::de::from_str::<JUnitTestSuite>(xml)
            .map(|suite| vec![suite])
            .map_err(|e| e.to_string()),
        Some(other) => Err(format!("unexpected root element <{other}>")),
        None => Err("no root element".to_string()),
    }
}

pub struct TestImporter<'a> {
    store: &'a dyn CicdStore,
}

impl<'a> TestImporter<'a> {
    pub fn new(store: &'a dyn CicdStore) -> Self {
        Self { store }
    }

    /// Import the test-report archive in `unpacked_dir`, if present, as one batch.
    pub async fn import(
        &self,
        tenant: &str,
        job_run_id: Uuid,
        unpacked_dir: &Path,
    ) -> TestImportSummary {
        let mut summary = TestImportSummary::default();
        let archive_path = unpacked_dir.join(TEST_REPORT_ARCHIVE);
        if !archive_path.is_file() {
            return summary;
        }

        let mut files = match archive::extract_zip_file(&archive_path, &unpacked_dir.join(TEST_REPORT_DIR)).await {
            Ok(files) => files,
            Err(e) => {
                let error = RecoverableError::Archive {
                    archive: TEST_REPORT_ARCHIVE.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %error, "Test reports skipped");
                summary.skipped.push(error);
                return summary;
            }
        };
        files.sort();

        let mut records: Vec<TestRecord> = Vec::new();
        for file in files {
            let label = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let parsed = match tokio::fs::read_to_string(&file).await {
                Ok(xml) => parse_report(&xml),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(suites) => {
                    summary.files_parsed += 1;
                    for suite in suites {
                        records.extend(suite.into_records(tenant, job_run_id));
                    }
                }
                Err(reason) => {
                    let error = RecoverableError::ReportFile { file: label, reason };
                    tracing::warn!(error = %error, "Test report skipped");
                    crate::metrics::subtree_skipped(error.reason());
                    summary.skipped.push(error);
                }
            }
        }

        let total = records.len();
        match self.store.insert_test_records(records).await {
            Ok(persisted) => {
                summary.persisted = persisted;
                crate::metrics::tests_persisted(persisted);
                tracing::info!(job_run_id = %job_run_id, total, persisted, "Test results stored");
            }
            Err(e) => {
                let error = RecoverableError::ReportFile {
                    file: TEST_REPORT_ARCHIVE.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(error = %error, "Failed to store test results");
                summary.skipped.push(error);
            }
        }
        summary
    }
}
