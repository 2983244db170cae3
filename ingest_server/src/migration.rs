//! Schema migration for the ingestion tables.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// SQL migration for job-run ingestion tables.
///
/// Every statement is idempotent so the migration runs on each start.
pub const MIGRATION_SQL: &str = r#"
-- ================================================================
-- CI/CD job-run ingestion tables
-- ================================================================

CREATE TABLE IF NOT EXISTS cicd_instances (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    name            VARCHAR(255),
    url             VARCHAR(500),
    instance_type   VARCHAR(32) NOT NULL DEFAULT 'jenkins',
    integration_id  VARCHAR(64),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_cicd_instances_tenant ON cicd_instances (tenant_id);

CREATE TABLE IF NOT EXISTS cicd_jobs (
    id                       UUID PRIMARY KEY,
    tenant_id                VARCHAR(128) NOT NULL,
    cicd_instance_id         UUID NOT NULL REFERENCES cicd_instances(id) ON DELETE CASCADE,
    job_name                 VARCHAR NOT NULL,
    job_full_name            VARCHAR NOT NULL,
    job_normalized_full_name VARCHAR,
    branch_name              VARCHAR,
    module_name              VARCHAR,
    scm_url                  VARCHAR,
    scm_user_id              VARCHAR,
    created_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uniq_cicd_jobs_instance_full_name UNIQUE (tenant_id, cicd_instance_id, job_full_name)
);

CREATE INDEX IF NOT EXISTS idx_cicd_jobs_normalized_name
    ON cicd_jobs (tenant_id, cicd_instance_id, job_normalized_full_name);

CREATE TABLE IF NOT EXISTS cicd_job_runs (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    cicd_job_id     UUID NOT NULL REFERENCES cicd_jobs(id) ON DELETE CASCADE,
    job_run_number  BIGINT NOT NULL,
    status          VARCHAR(64) NOT NULL,
    start_time      TIMESTAMPTZ NOT NULL,
    end_time        TIMESTAMPTZ NOT NULL,
    duration        INTEGER NOT NULL,
    cicd_user_id    VARCHAR,
    ci              BOOLEAN NOT NULL DEFAULT FALSE,
    cd              BOOLEAN NOT NULL DEFAULT FALSE,
    source          VARCHAR(64) NOT NULL,
    reference_id    VARCHAR(255) NOT NULL,
    scm_commit_ids  TEXT[] NOT NULL DEFAULT '{}',
    triggers        JSONB NOT NULL DEFAULT '[]',
    params          JSONB NOT NULL DEFAULT '[]',
    log_path        VARCHAR(500),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_cicd_job_runs_job ON cicd_job_runs (cicd_job_id);
CREATE INDEX IF NOT EXISTS idx_cicd_job_runs_reference ON cicd_job_runs (reference_id);

CREATE TABLE IF NOT EXISTS cicd_job_run_stages (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    cicd_job_run_id UUID NOT NULL REFERENCES cicd_job_runs(id) ON DELETE CASCADE,
    stage_id        VARCHAR(50) NOT NULL,
    name            VARCHAR(50) NOT NULL,
    description     VARCHAR(200) NOT NULL,
    result          VARCHAR(30) NOT NULL,
    state           VARCHAR(30) NOT NULL,
    duration        INTEGER NOT NULL,
    start_time      TIMESTAMPTZ NOT NULL,
    logs            VARCHAR(300) NOT NULL,
    url             VARCHAR(500) NOT NULL,
    full_path       JSONB NOT NULL,
    child_job_runs  UUID[] NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_cicd_job_run_stages_run ON cicd_job_run_stages (cicd_job_run_id);

CREATE TABLE IF NOT EXISTS cicd_job_run_stage_steps (
    id                    UUID PRIMARY KEY,
    tenant_id             VARCHAR(128) NOT NULL,
    cicd_job_run_stage_id UUID NOT NULL REFERENCES cicd_job_run_stages(id) ON DELETE CASCADE,
    step_id               VARCHAR(50) NOT NULL,
    display_name          VARCHAR(50) NOT NULL,
    display_description   VARCHAR(50) NOT NULL,
    result                VARCHAR(30) NOT NULL,
    state                 VARCHAR(30) NOT NULL,
    duration              INTEGER NOT NULL,
    start_time            TIMESTAMPTZ NOT NULL,
    log_path              VARCHAR(500)
);

CREATE INDEX IF NOT EXISTS idx_cicd_job_run_stage_steps_stage ON cicd_job_run_stage_steps (cicd_job_run_stage_id);

CREATE TABLE IF NOT EXISTS cicd_job_run_artifacts (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    cicd_job_run_id UUID NOT NULL REFERENCES cicd_job_runs(id) ON DELETE CASCADE,
    name            VARCHAR,
    location        VARCHAR,
    hash            VARCHAR,
    input           BOOLEAN NOT NULL DEFAULT FALSE,
    output          BOOLEAN NOT NULL DEFAULT FALSE,
    artifact_type   VARCHAR,
    qualifier       VARCHAR
);

CREATE INDEX IF NOT EXISTS idx_cicd_job_run_artifacts_run ON cicd_job_run_artifacts (cicd_job_run_id);

CREATE TABLE IF NOT EXISTS cicd_job_run_tests (
    id               UUID PRIMARY KEY,
    tenant_id        VARCHAR(128) NOT NULL,
    cicd_job_run_id  UUID NOT NULL REFERENCES cicd_job_runs(id) ON DELETE CASCADE,
    test_suite       VARCHAR NOT NULL,
    test_name        VARCHAR NOT NULL,
    status           VARCHAR(32) NOT NULL,
    duration         DOUBLE PRECISION NOT NULL DEFAULT 0,
    error_details    TEXT,
    error_stacktrace TEXT,
    CONSTRAINT uniq_cicd_job_run_tests_name UNIQUE (cicd_job_run_id, test_name)
);

CREATE TABLE IF NOT EXISTS coverage_reports (
    id                 UUID PRIMARY KEY,
    tenant_id          VARCHAR(128) NOT NULL,
    cicd_job_run_id    UUID NOT NULL REFERENCES cicd_job_runs(id) ON DELETE CASCADE,
    project_id         VARCHAR NOT NULL,
    project            VARCHAR NOT NULL,
    name               VARCHAR NOT NULL,
    directory          VARCHAR,
    functions_covered  INTEGER NOT NULL DEFAULT 0,
    total_functions    INTEGER NOT NULL DEFAULT 0,
    decisions_covered  INTEGER NOT NULL DEFAULT 0,
    total_decisions    INTEGER NOT NULL DEFAULT 0,
    conditions_covered INTEGER NOT NULL DEFAULT 0,
    total_conditions   INTEGER NOT NULL DEFAULT 0,
    file_hash          VARCHAR(64) NOT NULL,
    created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

DROP INDEX IF EXISTS idx_coverage_reports_dedup;
CREATE UNIQUE INDEX IF NOT EXISTS uq_coverage_reports_dedup ON coverage_reports (tenant_id, name, file_hash);

CREATE TABLE IF NOT EXISTS cicd_preprocess_tasks (
    id              UUID PRIMARY KEY,
    tenant_id       VARCHAR(128) NOT NULL,
    status          VARCHAR(16) NOT NULL DEFAULT 'PENDING',
    attempt_count   INTEGER NOT NULL DEFAULT 0,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS triage_counters (
    counter_key     VARCHAR(512) PRIMARY KEY,
    value           BIGINT NOT NULL DEFAULT 0,
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Run the ingestion schema migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("ingest migration failed: {e}"))?;
    Ok(())
}
