//! CI/CD job-run ingestion.
//!
//! Consumes job-run-complete notifications, persists the run tree with its
//! coverage and test reports, uploads node logs and fans out one triage
//! message per uploaded log.

pub mod config;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
