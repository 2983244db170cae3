//! Coverage report import with (name, content hash) deduplication.
//!
//! Three sources inside the unpacked result bundle:
//! - the fixed-name XML archive `levelops_code_coverage_xml.zip`,
//! - one archive named `levelops_code_coverage_<project>_xml.zip`,
//! - the binary archive `levelops_code_coverage.zip`, converted to XML by a
//!   [`CoverageConverter`] before import.
//!
//! A failure on one file is recorded and the batch continues.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::archive;
use super::hashing::sha256_hex;
use crate::error::RecoverableError;
use crate::models::coverage::{CoverageDocument, CoverageReport};
use crate::store::{CicdStore, ConversionRequest, CoverageConverter};

pub const FIXED_XML_ARCHIVE: &str = "levelops_code_coverage_xml.zip";
pub const BINARY_ARCHIVE: &str = "levelops_code_coverage.zip";
const CONVENTION_PREFIX: &str = "levelops_code_coverage_";
const CONVENTION_SUFFIX: &str = "_xml.zip";

/// First archive in `dir` following the `<prefix>_<project>_xml.zip`
/// convention, excluding the fixed-name archive.
pub async fn find_convention_archive(dir: &Path) -> Option<String> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(CONVENTION_PREFIX)
            || !name.ends_with(CONVENTION_SUFFIX)
            || name == FIXED_XML_ARCHIVE
        {
            continue;
        }
        if is_file(&entry.path()).await {
            names.push(name);
        }
    }
    names.sort();
    names.into_iter().next()
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// `levelops_code_coverage_myproj_xml.zip` -> `myproj`.
pub fn project_from_archive_name(archive_name: &str) -> String {
    archive_name
        .strip_prefix(CONVENTION_PREFIX)
        .and_then(|rest| rest.strip_suffix(CONVENTION_SUFFIX))
        .unwrap_or_default()
        .to_string()
}

/// `levelops_code_coverage_myproj_xml.zip` -> `levelops_code_coverage_myproj_xml`.
pub fn directory_from_archive_name(archive_name: &str) -> String {
    archive_name
        .strip_suffix(".zip")
        .unwrap_or(archive_name)
        .to_string()
}

/// Relative directory of `file` under `root` and its canonical file name.
///
/// The canonical name drops the last `_<token>` from the stem and keeps the
/// extension: `core/engine_3f2a.cov` -> (`core`, `engine.cov`).
pub fn extract_path_and_file_name(root: &Path, file: &Path) -> (String, String) {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = match stem.rfind('_') {
        Some(idx) => stem[..idx].to_string(),
        None => stem,
    };
    let extension = file
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    let relative = file
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();

    (relative, format!("{stem}.{extension}"))
}

/// Who the reports belong to.
#[derive(Debug, Clone)]
pub struct CoverageContext<'a> {
    pub tenant: &'a str,
    pub job_run_id: Uuid,
    pub job_name: &'a str,
    pub reference_id: &'a str,
}

#[derive(Debug, Default)]
pub struct CoverageImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: Vec<RecoverableError>,
}

impl CoverageImportSummary {
    fn skip(&mut self, error: RecoverableError) {
        crate::metrics::coverage_report("failed");
        tracing::warn!(error = %error, "Coverage file skipped");
        self.skipped.push(error);
    }
}

fn build_report(
    document: &CoverageDocument,
    ctx: &CoverageContext<'_>,
    project: &str,
    fallback_name: &str,
    file_hash: String,
) -> CoverageReport {
    let totals = document.summary();
    CoverageReport {
        id: Uuid::new_v4(),
        tenant_id: ctx.tenant.to_string(),
        cicd_job_run_id: ctx.job_run_id,
        project_id: document.build_id.clone().unwrap_or_default(),
        project: project.to_string(),
        name: document
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string()),
        directory: document.dir.clone(),
        functions_covered: totals.functions_covered,
        total_functions: totals.total_functions,
        decisions_covered: totals.decisions_covered,
        total_decisions: totals.total_decisions,
        conditions_covered: totals.conditions_covered,
        total_conditions: totals.total_conditions,
        file_hash,
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct CoverageImporter<'a> {
    store: &'a dyn CicdStore,
    converter: Option<&'a dyn CoverageConverter>,
}

impl<'a> CoverageImporter<'a> {
    pub fn new(store: &'a dyn CicdStore, converter: Option<&'a dyn CoverageConverter>) -> Self {
        Self { store, converter }
    }

    /// Import every coverage source present in `unpacked_dir`.
    pub async fn import(
        &self,
        ctx: &CoverageContext<'_>,
        unpacked_dir: &Path,
    ) -> CoverageImportSummary {
        let mut summary = CoverageImportSummary::default();

        // The convention archive names the project for both XML sources.
        let convention = find_convention_archive(unpacked_dir).await;
        let project = convention
            .as_deref()
            .map(project_from_archive_name)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ctx.job_name.to_string());

        self.import_xml_archive(ctx, unpacked_dir, FIXED_XML_ARCHIVE, &project, &mut summary)
            .await;
        if let Some(archive_name) = convention {
            self.import_xml_archive(ctx, unpacked_dir, &archive_name, &project, &mut summary)
                .await;
        }

        self.import_binary_archive(ctx, unpacked_dir, &mut summary).await;

        tracing::info!(
            job_run_id = %ctx.job_run_id,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped.len(),
            "Coverage import finished"
        );
        summary
    }

    async fn extract(
        &self,
        unpacked_dir: &Path,
        archive_name: &str,
        summary: &mut CoverageImportSummary,
    ) -> Option<(PathBuf, Vec<PathBuf>)> {
        let archive_path = unpacked_dir.join(archive_name);
        if !is_file(&archive_path).await {
            return None;
        }
        let dest = unpacked_dir.join(directory_from_archive_name(archive_name));
        match archive::extract_zip_file(&archive_path, &dest).await {
            Ok(mut files) => {
                files.sort();
                Some((dest, files))
            }
            Err(e) => {
                summary.skip(RecoverableError::Archive {
                    archive: archive_name.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    async fn import_xml_archive(
        &self,
        ctx: &CoverageContext<'_>,
        unpacked_dir: &Path,
        archive_name: &str,
        project: &str,
        summary: &mut CoverageImportSummary,
    ) {
        let Some((_, files)) = self.extract(unpacked_dir, archive_name, summary).await else {
            return;
        };
        tracing::debug!(archive = archive_name, files = files.len(), project, "Importing coverage XML");

        for file in files {
            let label = file_label(&file);
            let bytes = match tokio::fs::read(&file).await {
                Ok(b) => b,
                Err(e) => {
                    summary.skip(RecoverableError::ReportFile {
                        file: label,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let file_hash = sha256_hex(&bytes);
            let text = String::from_utf8_lossy(&bytes);
            let document: CoverageDocument = match quick_xml::de::from_str(&text) {
                Ok(d) => d,
                Err(e) => {
                    summary.skip(RecoverableError::ReportFile {
                        file: label,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let report = build_report(&document, ctx, project, &label, file_hash);
            self.persist(report, &label, summary).await;
        }
    }

    async fn import_binary_archive(
        &self,
        ctx: &CoverageContext<'_>,
        unpacked_dir: &Path,
        summary: &mut CoverageImportSummary,
    ) {
        if !is_file(&unpacked_dir.join(BINARY_ARCHIVE)).await {
            return;
        }
        let Some(converter) = self.converter else {
            tracing::warn!(
                archive = BINARY_ARCHIVE,
                "No coverage converter configured, skipping binary coverage"
            );
            return;
        };
        let Some((root, files)) = self.extract(unpacked_dir, BINARY_ARCHIVE, summary).await else {
            return;
        };

        for file in files {
            let label = file_label(&file);
            let (directory, canonical_name) = extract_path_and_file_name(&root, &file);
            let bytes = match tokio::fs::read(&file).await {
                Ok(b) => b,
                Err(e) => {
                    summary.skip(RecoverableError::ReportFile {
                        file: label,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let file_hash = sha256_hex(&bytes);

            // Known binaries are not converted again.
            match self
                .store
                .coverage_report_exists(ctx.tenant, &canonical_name, &file_hash)
                .await
            {
                Ok(true) => {
                    summary.duplicates += 1;
                    crate::metrics::coverage_report("duplicate");
                    tracing::info!(file = %canonical_name, hash = %file_hash, "Ignoring duplicate coverage binary");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    summary.skip(RecoverableError::ReportFile {
                        file: label,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }

            let request = ConversionRequest {
                customer: ctx.tenant.to_string(),
                job_run_id: ctx.job_run_id,
                reference_id: ctx.reference_id.to_string(),
                file_name: label.clone(),
            };
            let output = match converter.convert(&request, &file).await {
                Ok(result) if result.success && !result.standard_output.trim().is_empty() => {
                    result.standard_output
                }
                Ok(_) => {
                    summary.skip(RecoverableError::ReportFile {
                        file: label,
                        reason: "conversion produced no report".to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    summary.skip(RecoverableError::ReportFile {
                        file: label,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let document: CoverageDocument = match quick_xml::de::from_str(&output) {
                Ok(d) => d,
                Err(e) => {
                    summary.skip(RecoverableError::ReportFile {
                        file: label,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let mut report = build_report(&document, ctx, ctx.job_name, &canonical_name, file_hash);
            report.name = canonical_name;
            report.directory = Some(directory);
            self.persist(report, &label, summary).await;
        }
    }

    /// Insert a report. The store enforces (tenant, name, hash) uniqueness,
    /// so a report raced in by another worker counts as a duplicate here.
    async fn persist(&self, report: CoverageReport, label: &str, summary: &mut CoverageImportSummary) {
        let name = report.name.clone();
        let file_hash = report.file_hash.clone();
        match self.store.insert_coverage_report(report).await {
            Ok(Some(id)) => {
                summary.inserted += 1;
                crate::metrics::coverage_report("inserted");
                tracing::debug!(report_id = %id, file = label, "Coverage report inserted");
            }
            Ok(None) => {
                summary.duplicates += 1;
                crate::metrics::coverage_report("duplicate");
                tracing::info!(name = %name, hash = %file_hash, "Ignoring duplicate coverage report");
            }
            Err(e) => summary.skip(RecoverableError::ReportFile {
                file: label.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::archive::test_support::zip_bytes;
    use crate::store::memory::{MemoryCicdStore, StaticCoverageConverter};
    use crate::store::ConversionResult;

    const REPORT: &str = r#"<BullseyeCoverage name="engine" dir="/src/engine" buildId="b-1"
        fn_cov="8" fn_total="10" cd_cov="5" cd_total="12" d_cov="3" d_total="6">
        <folder name="core" fn_cov="8" fn_total="10"/>
    </BullseyeCoverage>"#;

    fn ctx(job_run_id: Uuid) -> CoverageContext<'static> {
        CoverageContext {
            tenant: "acme",
            job_run_id,
            job_name: "app/build",
            reference_id: "msg-1",
        }
    }

    #[test]
    fn test_archive_name_conventions() {
        assert_eq!(
            project_from_archive_name("levelops_code_coverage_myproj_xml.zip"),
            "myproj"
        );
        assert_eq!(
            directory_from_archive_name("levelops_code_coverage_myproj_xml.zip"),
            "levelops_code_coverage_myproj_xml"
        );
        assert_eq!(project_from_archive_name("levelops_code_coverage_xml.zip"), "");
        assert_eq!(project_from_archive_name("other.zip"), "");
    }

    #[test]
    fn test_extract_path_and_file_name() {
        let root = Path::new("/work/levelops_code_coverage");
        assert_eq!(
            extract_path_and_file_name(root, &root.join("core/io/engine_3f2a.cov")),
            ("core/io".to_string(), "engine.cov".to_string())
        );
        assert_eq!(
            extract_path_and_file_name(root, &root.join("plain.cov")),
            (String::new(), "plain.cov".to_string())
        );
    }

    #[tokio::test]
    async fn test_find_convention_archive_skips_fixed_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FIXED_XML_ARCHIVE), b"").unwrap();
        assert_eq!(find_convention_archive(dir.path()).await, None);
        std::fs::create_dir(dir.path().join("levelops_code_coverage_dir_xml.zip")).unwrap();
        assert_eq!(find_convention_archive(dir.path()).await, None);
        std::fs::write(dir.path().join("levelops_code_coverage_web_xml.zip"), b"").unwrap();
        assert_eq!(
            find_convention_archive(dir.path()).await.as_deref(),
            Some("levelops_code_coverage_web_xml.zip")
        );
    }

    #[test]
    fn test_document_summary_uses_root_attributes() {
        let document: CoverageDocument = quick_xml::de::from_str(REPORT).unwrap();
        let totals = document.summary();
        assert_eq!(totals.functions_covered, 8);
        assert_eq!(totals.total_conditions, 12);
        assert_eq!(totals.total_decisions, 6);
        assert_eq!(document.folders.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_across_reruns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(FIXED_XML_ARCHIVE),
            zip_bytes(&[("engine.xml", REPORT.as_bytes())]),
        )
        .unwrap();
        let store = MemoryCicdStore::new();
        let importer = CoverageImporter::new(&store, None);

        let first = importer.import(&ctx(Uuid::new_v4()), dir.path()).await;
        let second = importer.import(&ctx(Uuid::new_v4()), dir.path()).await;

        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        let reports = store.coverage_reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "engine");
        assert_eq!(reports[0].project, "app/build");
        assert_eq!(reports[0].project_id, "b-1");
    }

    #[tokio::test]
    async fn test_concurrent_imports_store_one_report() {
        let store = MemoryCicdStore::new();
        let dirs: Vec<_> = (0..4)
            .map(|_| {
                let dir = tempfile::tempdir().unwrap();
                std::fs::write(
                    dir.path().join(FIXED_XML_ARCHIVE),
                    zip_bytes(&[("engine.xml", REPORT.as_bytes())]),
                )
                .unwrap();
                dir
            })
            .collect();
        let importer = CoverageImporter::new(&store, None);
        let contexts: Vec<_> = dirs.iter().map(|_| ctx(Uuid::new_v4())).collect();

        let summaries = futures::future::join_all(
            dirs.iter()
                .zip(&contexts)
                .map(|(dir, ctx)| importer.import(ctx, dir.path())),
        )
        .await;

        let inserted: usize = summaries.iter().map(|s| s.inserted).sum();
        let duplicates: usize = summaries.iter().map(|s| s.duplicates).sum();
        assert_eq!(inserted, 1);
        assert_eq!(duplicates, 3);
        assert_eq!(store.coverage_reports().await.len(), 1);
    }

    #[tokio::test]
    async fn test_store_rejects_duplicate_insert() {
        let store = MemoryCicdStore::new();
        let document: CoverageDocument = quick_xml::de::from_str(REPORT).unwrap();
        let report = build_report(&document, &ctx(Uuid::new_v4()), "p", "engine", sha256_hex(b"r"));
        let mut again = report.clone();
        again.id = Uuid::new_v4();

        assert_eq!(store.insert_coverage_report(report.clone()).await.unwrap(), Some(report.id));
        assert_eq!(store.insert_coverage_report(again).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_changed_bytes_insert_new_row() {
        let store = MemoryCicdStore::new();
        let importer = CoverageImporter::new(&store, None);

        for fn_cov in ["8", "9"] {
            let dir = tempfile::tempdir().unwrap();
            let report = REPORT.replacen("fn_cov=\"8\"", &format!("fn_cov=\"{fn_cov}\""), 1);
            std::fs::write(
                dir.path().join(FIXED_XML_ARCHIVE),
                zip_bytes(&[("engine.xml", report.as_bytes())]),
            )
            .unwrap();
            importer.import(&ctx(Uuid::new_v4()), dir.path()).await;
        }

        assert_eq!(store.coverage_reports().await.len(), 2);
    }

    #[tokio::test]
    async fn test_convention_archive_sets_project_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("levelops_code_coverage_myproj_xml.zip"),
            zip_bytes(&[("good.xml", REPORT.as_bytes()), ("bad.xml", b"<unclosed")]),
        )
        .unwrap();
        let store = MemoryCicdStore::new();

        let summary = CoverageImporter::new(&store, None)
            .import(&ctx(Uuid::new_v4()), dir.path())
            .await;

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(dir.path().join("levelops_code_coverage_myproj_xml/good.xml").exists());
        assert_eq!(store.coverage_reports().await[0].project, "myproj");
    }

    #[tokio::test]
    async fn test_binary_coverage_dedups_before_conversion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(BINARY_ARCHIVE),
            zip_bytes(&[("core/engine_1a2b.cov", b"\x00\x01binary")]),
        )
        .unwrap();
        let store = MemoryCicdStore::new();
        let converter = StaticCoverageConverter::succeeding(REPORT);
        let importer = CoverageImporter::new(&store, Some(&converter));

        let first = importer.import(&ctx(Uuid::new_v4()), dir.path()).await;
        let second = importer.import(&ctx(Uuid::new_v4()), dir.path()).await;

        assert_eq!(first.inserted, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(converter.calls().await.len(), 1);
        let reports = store.coverage_reports().await;
        assert_eq!(reports[0].name, "engine.cov");
        assert_eq!(reports[0].directory.as_deref(), Some("core"));
    }

    #[tokio::test]
    async fn test_failed_conversion_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(BINARY_ARCHIVE),
            zip_bytes(&[("engine_1.cov", b"bin")]),
        )
        .unwrap();
        let store = MemoryCicdStore::new();
        let converter = StaticCoverageConverter::new(ConversionResult::default());

        let summary = CoverageImporter::new(&store, Some(&converter))
            .import(&ctx(Uuid::new_v4()), dir.path())
            .await;

        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.skipped.len(), 1);
        assert!(store.coverage_reports().await.is_empty());
    }
}
