//! Links back to the CI server UI for job runs and stages.

use regex::Regex;
use std::sync::LazyLock;

static BRANCH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*/branches/(.*)$").unwrap());
static LAST_SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.*/(.*)$").unwrap());

/// Console URL of a job run, or an empty string when the instance URL or
/// job name is unknown.
///
/// Folder (`/jobs/`) and multibranch (`/branches/`) separators in the full
/// name are rewritten to `/job/`.
pub fn job_run_url(instance_url: Option<&str>, job_full_name: &str, run_number: i64) -> String {
    let Some(base) = instance_url.map(str::trim).filter(|u| !u.is_empty()) else {
        return String::new();
    };
    if job_full_name.trim().is_empty() {
        return String::new();
    }
    let job_path = job_full_name
        .replace("/jobs/", "/job/")
        .replace("/branches/", "/job/");
    format!(
        "{}/job/{}/{}/console",
        base.trim_end_matches('/'),
        job_path.trim_matches('/'),
        run_number
    )
}

/// Pipeline view of one stage, or an empty string when inputs are missing.
pub fn stage_url(
    instance_url: Option<&str>,
    job_full_name: &str,
    run_number: i64,
    stage_node_id: &str,
) -> String {
    let Some(base) = instance_url.map(str::trim).filter(|u| !u.is_empty()) else {
        return String::new();
    };
    if job_full_name.trim().is_empty() || stage_node_id.is_empty() {
        return String::new();
    }

    let (pipeline, branch) = if let Some(caps) = BRANCH_REGEX.captures(job_full_name) {
        let branch = caps.get(1).map_or("", |m| m.as_str());
        let pipeline = job_full_name
            .strip_suffix(&format!("/branches/{branch}"))
            .unwrap_or(job_full_name);
        (pipeline.to_string(), branch.to_string())
    } else if let Some(caps) = LAST_SEGMENT_REGEX.captures(job_full_name) {
        let last = caps.get(1).map_or("", |m| m.as_str());
        (job_full_name.to_string(), last.to_string())
    } else {
        (job_full_name.to_string(), job_full_name.to_string())
    };

    let pipeline = pipeline.replace("/jobs/", "/").replace('/', "%2F");
    format!(
        "{}/blue/organizations/jenkins/{}/detail/{}/{}/pipeline/{}",
        base.trim_end_matches('/'),
        pipeline,
        branch,
        run_number,
        stage_node_id
    )
}
