//! Ingestion data models: request payloads and persisted rows.

pub mod artifact;
pub mod coverage;
pub mod instance;
pub mod job;
pub mod job_run;
pub mod request;
pub mod stage;
pub mod step;
pub mod task;
pub mod test_record;
pub mod triage;
