//! coverage.report: Code-coverage summary of one report file, deduplicated
//! per tenant by (name, file hash).

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::coverage_reports;

#[derive(Debug, Clone, Insertable, Serialize)]
#[diesel(table_name = coverage_reports)]
pub struct CoverageReport {
    pub id: Uuid,
    pub tenant_id: String,
    pub cicd_job_run_id: Uuid,
    pub project_id: String,
    pub project: String,
    pub name: String,
    pub directory: Option<String>,
    pub functions_covered: i32,
    pub total_functions: i32,
    pub decisions_covered: i32,
    pub total_decisions: i32,
    pub conditions_covered: i32,
    pub total_conditions: i32,
    /// Hex SHA-256 of the report bytes.
    pub file_hash: String,
}

/// Root of a coverage XML document (`<BullseyeCoverage>`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverageDocument {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "@dir", default)]
    pub dir: Option<String>,
    #[serde(rename = "@buildId", default)]
    pub build_id: Option<String>,
    #[serde(rename = "@fn_cov", default)]
    pub fn_cov: Option<String>,
    #[serde(rename = "@fn_total", default)]
    pub fn_total: Option<String>,
    #[serde(rename = "@cd_cov", default)]
    pub cd_cov: Option<String>,
    #[serde(rename = "@cd_total", default)]
    pub cd_total: Option<String>,
    #[serde(rename = "@d_cov", default)]
    pub d_cov: Option<String>,
    #[serde(rename = "@d_total", default)]
    pub d_total: Option<String>,
    #[serde(rename = "folder", default)]
    pub folders: Vec<CoverageNode>,
    #[serde(rename = "src", default)]
    pub sources: Vec<CoverageNode>,
}

/// A `<folder>` or `<src>` element.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverageNode {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "@fn_cov", default)]
    pub fn_cov: Option<String>,
    #[serde(rename = "@fn_total", default)]
    pub fn_total: Option<String>,
    #[serde(rename = "@cd_cov", default)]
    pub cd_cov: Option<String>,
    #[serde(rename = "@cd_total", default)]
    pub cd_total: Option<String>,
    #[serde(rename = "@d_cov", default)]
    pub d_cov: Option<String>,
    #[serde(rename = "@d_total", default)]
    pub d_total: Option<String>,
    #[serde(rename = "folder", default)]
    pub folders: Vec<CoverageNode>,
    #[serde(rename = "src", default)]
    pub sources: Vec<CoverageNode>,
}

/// Covered/total counters: functions, conditions/decisions, decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageTotals {
    pub functions_covered: i32,
    pub total_functions: i32,
    pub conditions_covered: i32,
    pub total_conditions: i32,
    pub decisions_covered: i32,
    pub total_decisions: i32,
}

fn count(raw: &Option<String>) -> Option<i32> {
    raw.as_deref().and_then(|v| v.trim().parse().ok())
}

impl CoverageTotals {
    #[allow(clippy::too_many_arguments)]
    fn from_attrs(
        fn_cov: &Option<String>,
        fn_total: &Option<String>,
        cd_cov: &Option<String>,
        cd_total: &Option<String>,
        d_cov: &Option<String>,
        d_total: &Option<String>,
    ) -> Option<Self> {
        if fn_total.is_none() && cd_total.is_none() && d_total.is_none() {
            return None;
        }
        Some(Self {
            functions_covered: count(fn_cov).unwrap_or(0),
            total_functions: count(fn_total).unwrap_or(0),
            conditions_covered: count(cd_cov).unwrap_or(0),
            total_conditions: count(cd_total).unwrap_or(0),
            decisions_covered: count(d_cov).unwrap_or(0),
            total_decisions: count(d_total).unwrap_or(0),
        })
    }

    fn add(self, other: CoverageTotals) -> CoverageTotals {
        CoverageTotals {
            functions_covered: self.functions_covered + other.functions_covered,
            total_functions: self.total_functions + other.total_functions,
            conditions_covered: self.conditions_covered + other.conditions_covered,
            total_conditions: self.total_conditions + other.total_conditions,
            decisions_covered: self.decisions_covered + other.decisions_covered,
            total_decisions: self.total_decisions + other.total_decisions,
        }
    }
}

impl CoverageNode {
    pub fn totals(&self) -> CoverageTotals {
        CoverageTotals::from_attrs(
            &self.fn_cov,
            &self.fn_total,
            &self.cd_cov,
            &self.cd_total,
            &self.d_cov,
            &self.d_total,
        )
        .unwrap_or_default()
    }
}

impl CoverageDocument {
    /// Report-level totals: the root attributes when present, otherwise the
    /// sum over top-level folders and sources.
    pub fn summary(&self) -> CoverageTotals {
        if let Some(totals) = CoverageTotals::from_attrs(
            &self.fn_cov,
            &self.fn_total,
            &self.cd_cov,
            &self.cd_total,
            &self.d_cov,
            &self.d_total,
        ) {
            return totals;
        }
        self.folders
            .iter()
            .chain(self.sources.iter())
            .fold(CoverageTotals::default(), |acc, node| acc.add(node.totals()))
    }
}
