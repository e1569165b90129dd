// HTTP surface for the Task Dispatcher: POST /tasks/next, PUT
// /tasks/{id}/heartbeat, PUT /tasks/{id}/complete, GET /tasks,
// /tasks/{id}, /tasks/started, /tasks/processed, GET /healthz, GET /metrics.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use warden_common::error::AppError;
use warden_common::types::dto::{
    AbandonTaskRequest, ClaimNextRequest, CompleteTaskRequest, DispatcherHealthResponse,
    HeartbeatRequest, HeartbeatResponse, TaskResponse,
};

use crate::lease_client::LeaseManagerClient;
use crate::metrics::TaskDispatcherMetrics;
use crate::store::TaskStore;

#[derive(Clone)]
pub struct AppState<C: LeaseManagerClient + Clone> {
    pub store: TaskStore<C>,
    pub metrics: Arc<TaskDispatcherMetrics>,
    pub lease_client: C,
}

pub fn router<C: LeaseManagerClient + Clone>(state: AppState<C>) -> Router {
    Router::new()
        .route("/tasks/next", axum::routing::post(claim_next))
        .route("/tasks/{id}/heartbeat", put(heartbeat))
        .route("/tasks/{id}/complete", put(complete))
        .route("/tasks/{id}/abandon", put(abandon))
        .route("/tasks", get(list_all))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/started", get(list_started))
        .route("/tasks/processed", get(list_processed))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn claim_next<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
    Json(body): Json<ClaimNextRequest>,
) -> Result<impl IntoResponse, AppError> {
    if body.processor.trim().is_empty() {
        return Err(AppError::validation("processor must be non-empty"));
    }
    match state.store.claim_next(&body.processor).await? {
        Some(task) => Ok((StatusCode::ACCEPTED, Json(TaskResponse::from(task))).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn heartbeat<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
    Path(id): Path<i64>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let task = state.store.heartbeat(id, &body.processor).await?;
    let must_heartbeat_before = task
        .must_heartbeat_before
        .ok_or_else(|| AppError::internal("heartbeat succeeded without a deadline"))?;
    Ok((StatusCode::ACCEPTED, Json(HeartbeatResponse { must_heartbeat_before })))
}

async fn complete<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
    Path(id): Path<i64>,
    Json(body): Json<CompleteTaskRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.store.complete(id, &body.processor, body.output).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn abandon<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
    Path(id): Path<i64>,
    Json(body): Json<AbandonTaskRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.store.abandon(id, &body.processor).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_all<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse, AppError> {
    let tasks = state.store.list_all().await?;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect::<Vec<_>>()))
}

async fn get_task<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let task = state.store.get(id).await?;
    Ok(Json(TaskResponse::from(task)))
}

async fn list_started<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse, AppError> {
    let tasks = state.store.list_started().await?;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect::<Vec<_>>()))
}

async fn list_processed<C: LeaseManagerClient + Clone>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse, AppError> {
    let tasks = state.store.list_processed().await?;
    Ok(Json(tasks.into_iter().map(TaskResponse::from).collect::<Vec<_>>()))
}

async fn health<C: LeaseManagerClient + Clone>(State(state): State<AppState<C>>) -> impl IntoResponse {
    let lease_manager = if state.lease_client.healthy().await { "ok" } else { "unreachable" };
    Json(DispatcherHealthResponse { status: "ok", timestamp: Utc::now(), lease_manager })
}

async fn metrics<C: LeaseManagerClient + Clone>(State(state): State<AppState<C>>) -> impl IntoResponse {
    state.metrics.render_prometheus()
}
