//! Ingestion services: tree persistence, report import, log upload and triage.

pub mod archive;
pub mod coverage_importer;
pub mod hashing;
pub mod log_uploader;
pub mod pipeline;
pub mod test_importer;
pub mod tree_builder;
pub mod triage_dispatcher;
pub mod urls;
pub mod worker;
