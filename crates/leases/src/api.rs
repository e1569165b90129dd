// HTTP surface for the Lease Manager: POST /leases, PUT /leases/renew,
// DELETE /leases/{id}, GET /leases?state=, GET /healthz, GET /metrics.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use warden_common::error::AppError;
use warden_common::types::dto::{
    AcquireLeaseRequest, HealthResponse, LeaseResponse, ListLeasesQuery, RenewLeaseRequest,
};

use crate::metrics::LeaseManagerMetrics;
use crate::store::LeaseStore;

#[derive(Clone)]
pub struct AppState {
    pub store: LeaseStore,
    pub metrics: Arc<LeaseManagerMetrics>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/leases", post(acquire_lease).get(list_leases))
        .route("/leases/renew", put(renew_lease))
        .route("/leases/{id}", delete(release_lease))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn acquire_lease(
    State(state): State<AppState>,
    Json(body): Json<AcquireLeaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    if body.resource.trim().is_empty() || body.holder.trim().is_empty() {
        return Err(AppError::validation("resource and holder must be non-empty"));
    }
    let lease = state.store.acquire(&body.resource, &body.holder).await?;
    Ok((StatusCode::CREATED, Json(LeaseResponse::from(lease))))
}

async fn renew_lease(
    State(state): State<AppState>,
    Json(body): Json<RenewLeaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    if body.resource.trim().is_empty() || body.holder.trim().is_empty() {
        return Err(AppError::validation("resource and holder must be non-empty"));
    }
    let lease = state.store.renew(&body.resource, &body.holder).await?;
    Ok((StatusCode::CREATED, Json(LeaseResponse::from(lease))))
}

async fn release_lease(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let lease = state.store.release(id).await?;
    Ok((StatusCode::OK, Json(LeaseResponse::from(lease))))
}

async fn list_leases(
    State(state): State<AppState>,
    Query(query): Query<ListLeasesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let leases = state.store.list_by_state(query.state.as_deref()).await?;
    let response: Vec<LeaseResponse> = leases.into_iter().map(LeaseResponse::from).collect();
    Ok(Json(response))
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok", timestamp: Utc::now() })
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render_prometheus()
}
