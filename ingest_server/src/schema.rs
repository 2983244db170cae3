//! Diesel table definitions for job-run ingestion.
//!
//! Tables: cicd_instances, cicd_jobs, cicd_job_runs, cicd_job_run_stages,
//! cicd_job_run_stage_steps, cicd_job_run_artifacts, cicd_job_run_tests,
//! coverage_reports, cicd_preprocess_tasks, triage_counters.
//! All tables carry tenant_id; ids are assigned by the ingester.

diesel::table! {
    cicd_instances (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        name -> Nullable<Varchar>,
        url -> Nullable<Varchar>,
        instance_type -> Varchar,
        integration_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    cicd_jobs (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        cicd_instance_id -> Uuid,
        job_name -> Varchar,
        job_full_name -> Varchar,
        job_normalized_full_name -> Nullable<Varchar>,
        branch_name -> Nullable<Varchar>,
        module_name -> Nullable<Varchar>,
        scm_url -> Nullable<Varchar>,
        scm_user_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    cicd_job_runs (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        cicd_job_id -> Uuid,
        job_run_number -> Int8,
        status -> Varchar,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
        duration -> Int4,
        cicd_user_id -> Nullable<Varchar>,
        ci -> Bool,
        cd -> Bool,
        source -> Varchar,
        reference_id -> Varchar,
        scm_commit_ids -> Array<Text>,
        triggers -> Jsonb,
        params -> Jsonb,
        log_path -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    cicd_job_run_stages (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        cicd_job_run_id -> Uuid,
        stage_id -> Varchar,
        name -> Varchar,
        description -> Varchar,
        result -> Varchar,
        state -> Varchar,
        duration -> Int4,
        start_time -> Timestamptz,
        logs -> Varchar,
        url -> Varchar,
        full_path -> Jsonb,
        child_job_runs -> Array<Uuid>,
    }
}

diesel::table! {
    cicd_job_run_stage_steps (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        cicd_job_run_stage_id -> Uuid,
        step_id -> Varchar,
        display_name -> Varchar,
        display_description -> Varchar,
        result -> Varchar,
        state -> Varchar,
        duration -> Int4,
        start_time -> Timestamptz,
        log_path -> Nullable<Varchar>,
    }
}

diesel::table! {
    cicd_job_run_artifacts (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        cicd_job_run_id -> Uuid,
        name -> Nullable<Varchar>,
        location -> Nullable<Varchar>,
        hash -> Nullable<Varchar>,
        input -> Bool,
        output -> Bool,
        artifact_type -> Nullable<Varchar>,
        qualifier -> Nullable<Varchar>,
    }
}

diesel::table! {
    cicd_job_run_tests (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        cicd_job_run_id -> Uuid,
        test_suite -> Varchar,
        test_name -> Varchar,
        status -> Varchar,
        duration -> Float8,
        error_details -> Nullable<Text>,
        error_stacktrace -> Nullable<Text>,
    }
}

diesel::table! {
    coverage_reports (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        cicd_job_run_id -> Uuid,
        project_id -> Varchar,
        project -> Varchar,
        name -> Varchar,
        directory -> Nullable<Varchar>,
        functions_covered -> Int4,
        total_functions -> Int4,
        decisions_covered -> Int4,
        total_decisions -> Int4,
        conditions_covered -> Int4,
        total_conditions -> Int4,
        file_hash -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    cicd_preprocess_tasks (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        status -> Varchar,
        attempt_count -> Int4,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    triage_counters (counter_key) {
        counter_key -> Varchar,
        value -> Int8,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(cicd_jobs -> cicd_instances (cicd_instance_id));
diesel::joinable!(cicd_job_runs -> cicd_jobs (cicd_job_id));
diesel::joinable!(cicd_job_run_stages -> cicd_job_runs (cicd_job_run_id));
diesel::joinable!(cicd_job_run_stage_steps -> cicd_job_run_stages (cicd_job_run_stage_id));
diesel::joinable!(cicd_job_run_artifacts -> cicd_job_runs (cicd_job_run_id));
diesel::joinable!(cicd_job_run_tests -> cicd_job_runs (cicd_job_run_id));
diesel::joinable!(coverage_reports -> cicd_job_runs (cicd_job_run_id));

diesel::allow_tables_to_appear_in_same_query!(
    cicd_instances,
    cicd_jobs,
    cicd_job_runs,
    cicd_job_run_stages,
    cicd_job_run_stage_steps,
    cicd_job_run_artifacts,
    cicd_job_run_tests,
    coverage_reports,
    cicd_preprocess_tasks,
    triage_counters,
);
