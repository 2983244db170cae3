//! Ingestion HTTP routes: notification intake and health.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::models::request::JobRunCompleteNotification;
use crate::services::worker::WorkerPool;

/// Shared state for ingestion route handlers.
#[derive(Clone)]
pub struct IngestRouterState {
    pub workers: WorkerPool,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub task_id: Uuid,
    pub message_id: String,
}

/// Build the ingestion router.
pub fn ingest_router(state: IngestRouterState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/ingest/job-run-complete", post(job_run_complete_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}

async fn job_run_complete_handler(
    State(state): State<IngestRouterState>,
    Json(notification): Json<JobRunCompleteNotification>,
) -> Result<(StatusCode, Json<AcceptedResponse>), StatusCode> {
    if notification.tenant.trim().is_empty() {
        tracing::warn!(message_id = %notification.message_id, "Rejecting notification without tenant");
        return Err(StatusCode::BAD_REQUEST);
    }

    let response = AcceptedResponse {
        task_id: notification.task_id,
        message_id: notification.message_id.clone(),
    };
    let tenant = notification.tenant.clone();
    match state.workers.submit(notification) {
        // Outcome is recorded on the task row.
        Ok(_) => {
            tracing::info!(
                tenant = %tenant,
                message_id = %response.message_id,
                task_id = %response.task_id,
                "Job run notification queued"
            );
            Ok((StatusCode::ACCEPTED, Json(response)))
        }
        Err(e) => {
            tracing::warn!(
                tenant = %tenant,
                message_id = %response.message_id,
                error = %e,
                "Job run notification rejected"
            );
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::services::pipeline::Pipeline;
    use crate::store::memory::{MemoryCicdStore, MemoryEventBus, MemoryTriageCounter};
    use crate::store::object::ObjectBlobStore;

    fn pool() -> WorkerPool {
        let pipeline = Pipeline::new(
            Arc::new(MemoryCicdStore::new()),
            Arc::new(ObjectBlobStore::memory()),
            Arc::new(ObjectBlobStore::memory()),
            Arc::new(MemoryEventBus::new()),
            Arc::new(MemoryTriageCounter::new()),
            "triage",
        );
        WorkerPool::new(Arc::new(pipeline), 1, Duration::from_secs(5))
    }

    fn router() -> Router {
        ingest_router(IngestRouterState { workers: pool() }, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let body = serde_json::json!({
            "tenant": "acme",
            "message_id": "m-1",
            "task_id": Uuid::new_v4(),
            "json_file_path": "in/job.json"
        });
        let response = router()
            .oneshot(
                Request::post("/ingest/job-run-complete")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_blank_tenant_is_rejected() {
        let body = serde_json::json!({
            "tenant": " ",
            "message_id": "m-1",
            "task_id": Uuid::new_v4()
        });
        let response = router()
            .oneshot(
                Request::post("/ingest/job-run-complete")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_drained_pool_returns_unavailable() {
        let workers = pool();
        workers.drain().await;
        let app = ingest_router(IngestRouterState { workers }, Duration::from_secs(5));
        let body = serde_json::json!({
            "tenant": "acme",
            "message_id": "m-1",
            "task_id": Uuid::new_v4(),
            "json_file_path": "in/job.json"
        });
        let response = app
            .oneshot(
                Request::post("/ingest/job-run-complete")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
