//! Postgres-backed store and triage counter (diesel-async over a deadpool pool).

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Varchar};
use diesel::upsert::excluded;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use super::{CicdStore, TriageCounter};
use crate::models::artifact::CicdJobRunArtifact;
use crate::models::coverage::CoverageReport;
use crate::models::instance::{CicdInstance, NewCicdInstance};
use crate::models::job::CicdJob;
use crate::models::job_run::CicdJobRun;
use crate::models::stage::JobRunStage;
use crate::models::step::JobRunStageStep;
use crate::models::task::TaskStatus;
use crate::models::test_record::TestRecord;
use crate::schema::{
    cicd_instances, cicd_job_run_artifacts, cicd_job_run_stage_steps, cicd_job_run_stages,
    cicd_job_run_tests, cicd_job_runs, cicd_jobs, cicd_preprocess_tasks, coverage_reports,
};

pub type PgPool = Pool<AsyncPgConnection>;

async fn checkout(pool: &PgPool) -> anyhow::Result<Object<AsyncPgConnection>> {
    pool.get()
        .await
        .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))
}

#[derive(Clone)]
pub struct PgCicdStore {
    pool: PgPool,
}

impl PgCicdStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CicdStore for PgCicdStore {
    async fn get_instance(&self, tenant: &str, id: Uuid) -> anyhow::Result<Option<CicdInstance>> {
        let mut conn = checkout(&self.pool).await?;
        let result = cicd_instances::table
            .filter(cicd_instances::tenant_id.eq(tenant))
            .filter(cicd_instances::id.eq(id))
            .select(CicdInstance::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(result)
    }

    async fn upsert_instance(&self, instance: NewCicdInstance) -> anyhow::Result<Uuid> {
        let mut conn = checkout(&self.pool).await?;
        let id = diesel::insert_into(cicd_instances::table)
            .values(&instance)
            .on_conflict(cicd_instances::id)
            .do_update()
            .set((
                cicd_instances::name.eq(excluded(cicd_instances::name)),
                cicd_instances::url.eq(excluded(cicd_instances::url)),
                cicd_instances::instance_type.eq(excluded(cicd_instances::instance_type)),
                cicd_instances::updated_at.eq(diesel::dsl::now),
            ))
            .returning(cicd_instances::id)
            .get_result::<Uuid>(&mut conn)
            .await?;
        Ok(id)
    }

    async fn upsert_job(&self, job: CicdJob) -> anyhow::Result<Uuid> {
        let mut conn = checkout(&self.pool).await?;
        let id = diesel::insert_into(cicd_jobs::table)
            .values(&job)
            .on_conflict((
                cicd_jobs::tenant_id,
                cicd_jobs::cicd_instance_id,
                cicd_jobs::job_full_name,
            ))
            .do_update()
            .set((
                cicd_jobs::scm_url.eq(excluded(cicd_jobs::scm_url)),
                cicd_jobs::scm_user_id.eq(excluded(cicd_jobs::scm_user_id)),
                cicd_jobs::job_normalized_full_name.eq(excluded(cicd_jobs::job_normalized_full_name)),
                cicd_jobs::branch_name.eq(excluded(cicd_jobs::branch_name)),
                cicd_jobs::updated_at.eq(diesel::dsl::now),
            ))
            .returning(cicd_jobs::id)
            .get_result::<Uuid>(&mut conn)
            .await?;
        Ok(id)
    }

    async fn find_jobs_by_normalized_name(
        &self,
        tenant: &str,
        instance_id: Uuid,
        normalized_name: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<CicdJob>> {
        let mut conn = checkout(&self.pool).await?;
        let jobs = cicd_jobs::table
            .filter(cicd_jobs::tenant_id.eq(tenant))
            .filter(cicd_jobs::cicd_instance_id.eq(instance_id))
            .filter(cicd_jobs::job_normalized_full_name.eq(normalized_name))
            .select(CicdJob::as_select())
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(jobs)
    }

    async fn insert_job_run(&self, run: CicdJobRun) -> anyhow::Result<Uuid> {
        let mut conn = checkout(&self.pool).await?;
        let id = diesel::insert_into(cicd_job_runs::table)
            .values(&run)
            .returning(cicd_job_runs::id)
            .get_result::<Uuid>(&mut conn)
            .await?;
        Ok(id)
    }

    async fn set_job_run_log_path(&self, tenant: &str, id: Uuid, path: &str) -> anyhow::Result<()> {
        let mut conn = checkout(&self.pool).await?;
        diesel::update(
            cicd_job_runs::table
                .filter(cicd_job_runs::tenant_id.eq(tenant))
                .filter(cicd_job_runs::id.eq(id)),
        )
        .set(cicd_job_runs::log_path.eq(path))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    async fn insert_stage(&self, stage: JobRunStage) -> anyhow::Result<Uuid> {
        let mut conn = checkout(&self.pool).await?;
        // full_path is serialized through serde_json::Value, so the row is passed by value.
        let id = diesel::insert_into(cicd_job_run_stages::table)
            .values(stage)
            .returning(cicd_job_run_stages::id)
            .get_result::<Uuid>(&mut conn)
            .await?;
        Ok(id)
    }

    async fn set_stage_child_job_runs(
        &self,
        tenant: &str,
        id: Uuid,
        child_job_runs: &[Uuid],
    ) -> anyhow::Result<()> {
        let mut conn = checkout(&self.pool).await?;
        diesel::update(
            cicd_job_run_stages::table
                .filter(cicd_job_run_stages::tenant_id.eq(tenant))
                .filter(cicd_job_run_stages::id.eq(id)),
        )
        .set(cicd_job_run_stages::child_job_runs.eq(child_job_runs.to_vec()))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    async fn insert_step(&self, step: JobRunStageStep) -> anyhow::Result<Uuid> {
        let mut conn = checkout(&self.pool).await?;
        let id = diesel::insert_into(cicd_job_run_stage_steps::table)
            .values(&step)
            .returning(cicd_job_run_stage_steps::id)
            .get_result::<Uuid>(&mut conn)
            .await?;
        Ok(id)
    }

    async fn set_step_log_path(&self, tenant: &str, id: Uuid, path: &str) -> anyhow::Result<()> {
        let mut conn = checkout(&self.pool).await?;
        diesel::update(
            cicd_job_run_stage_steps::table
                .filter(cicd_job_run_stage_steps::tenant_id.eq(tenant))
                .filter(cicd_job_run_stage_steps::id.eq(id)),
        )
        .set(cicd_job_run_stage_steps::log_path.eq(path))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    async fn insert_artifacts(&self, artifacts: Vec<CicdJobRunArtifact>) -> anyhow::Result<usize> {
        if artifacts.is_empty() {
            return Ok(0);
        }
        let mut conn = checkout(&self.pool).await?;
        let written = diesel::insert_into(cicd_job_run_artifacts::table)
            .values(&artifacts)
            .execute(&mut conn)
            .await?;
        Ok(written)
    }

    async fn coverage_report_exists(
        &self,
        tenant: &str,
        name: &str,
        file_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut conn = checkout(&self.pool).await?;
        let count: i64 = coverage_reports::table
            .filter(coverage_reports::tenant_id.eq(tenant))
            .filter(coverage_reports::name.eq(name))
            .filter(coverage_reports::file_hash.eq(file_hash))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn insert_coverage_report(&self, report: CoverageReport) -> anyhow::Result<Option<Uuid>> {
        let mut conn = checkout(&self.pool).await?;
        // Unique on (tenant_id, name, file_hash): a concurrent duplicate returns no row.
        let id = diesel::insert_into(coverage_reports::table)
            .values(&report)
            .on_conflict_do_nothing()
            .returning(coverage_reports::id)
            .get_result::<Uuid>(&mut conn)
            .await
            .optional()?;
        Ok(id)
    }

    async fn insert_test_records(&self, records: Vec<TestRecord>) -> anyhow::Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = checkout(&self.pool).await?;
        let written = diesel::insert_into(cicd_job_run_tests::table)
            .values(&records)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(written)
    }

    async fn update_task_status(
        &self,
        tenant: &str,
        task_id: Uuid,
        status: TaskStatus,
        bump_attempt: bool,
    ) -> anyhow::Result<()> {
        let mut conn = checkout(&self.pool).await?;
        let initial_attempts = i32::from(bump_attempt);
        diesel::insert_into(cicd_preprocess_tasks::table)
            .values((
                cicd_preprocess_tasks::id.eq(task_id),
                cicd_preprocess_tasks::tenant_id.eq(tenant),
                cicd_preprocess_tasks::status.eq(status.as_str()),
                cicd_preprocess_tasks::attempt_count.eq(initial_attempts),
            ))
            .on_conflict(cicd_preprocess_tasks::id)
            .do_update()
            .set((
                cicd_preprocess_tasks::status.eq(status.as_str()),
                cicd_preprocess_tasks::attempt_count
                    .eq(cicd_preprocess_tasks::attempt_count + initial_attempts),
                cicd_preprocess_tasks::updated_at.eq(diesel::dsl::now),
            ))
            .execute(&mut conn)
            .await?;

        tracing::debug!(task_id = %task_id, status = %status, "Task status updated");
        Ok(())
    }
}

#[derive(QueryableByName)]
struct CounterValue {
    #[diesel(sql_type = BigInt)]
    value: i64,
}

/// Fetch-and-add counter on the `triage_counters` table.
#[derive(Clone)]
pub struct PgTriageCounter {
    pool: PgPool,
}

impl PgTriageCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriageCounter for PgTriageCounter {
    async fn increment(&self, key: &str, by: i64) -> anyhow::Result<i64> {
        let mut conn = checkout(&self.pool).await?;
        let row = diesel::sql_query(
            "INSERT INTO triage_counters (counter_key, value) VALUES ($1, $2) \
             ON CONFLICT (counter_key) DO UPDATE \
             SET value = triage_counters.value + EXCLUDED.value, updated_at = NOW() \
             RETURNING value",
        )
        .bind::<Varchar, _>(key)
        .bind::<BigInt, _>(by)
        .get_result::<CounterValue>(&mut conn)
        .await?;
        Ok(row.value)
    }
}
