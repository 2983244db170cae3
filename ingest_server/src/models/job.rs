//! cicd.job: A named, branch-scoped pipeline definition under an instance.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::cicd_jobs;

/// Singleton per (tenant, instance, full name); the normalized full name is
/// the lookup key for child jobs.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = cicd_jobs)]
pub struct CicdJob {
    pub id: Uuid,
    pub tenant_id: String,
    pub cicd_instance_id: Uuid,
    pub job_name: String,
    pub job_full_name: String,
    pub job_normalized_full_name: Option<String>,
    pub branch_name: Option<String>,
    pub module_name: Option<String>,
    pub scm_url: Option<String>,
    pub scm_user_id: Option<String>,
}

/// Strip credentials, a trailing `.git` and trailing slashes from a repository URL.
pub fn sanitize_scm_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_credentials = match url::Url::parse(trimmed) {
        Ok(mut parsed) if parsed.has_host() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => trimmed.to_string(),
    };
    let mut sanitized = without_credentials.trim_end_matches('/');
    if let Some(stripped) = sanitized.strip_suffix(".git") {
        sanitized = stripped;
    }
    sanitized.trim_end_matches('/').to_string()
}
