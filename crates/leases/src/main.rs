use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tracing::{info_span, Instrument};
use tracing_subscriber::EnvFilter;

use warden_common::request_id::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    REQUEST_ID_HEADER,
};
use warden_leases::api::{self, AppState};
use warden_leases::config::LeaseManagerConfig;
use warden_leases::cors;
use warden_leases::db::migrations::run_migrations;
use warden_leases::db::pool::{create_pg_pool, PoolConfig};
use warden_leases::metrics::{self, LeaseManagerMetrics};
use warden_leases::store::LeaseStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = LeaseManagerConfig::from_env().context("failed to load lease manager config")?;
    init_tracing(&config.log_filter);

    let pool = create_pg_pool(&config.database_url, PoolConfig::from_env())
        .await
        .context("failed to create database pool")?;
    run_migrations(&pool).await.context("failed to run migrations")?;

    let metrics = Arc::new(LeaseManagerMetrics::default());
    metrics::set_global_metrics(metrics.clone());

    let state = AppState { store: LeaseStore::new(pool, config.lease_ttl), metrics };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "lease manager listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    api::router(state).layer(cors::cors_layer()).layer(middleware::from_fn(request_context_middleware))
}

/// One `tracing::Span` per request, carrying a request id forwarded from
/// `x-request-id` or generated here. The id is also stashed in a task-local
/// (`with_request_id_scope`) so `AppError::into_response` can stamp it onto
/// the error envelope without the handler threading it through.
async fn request_context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    request.headers_mut().insert(REQUEST_ID_HEADER, request_id.parse().unwrap());

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let request_span = info_span!("lease_manager.http.request", request_id = %request_id, %method, %path);
    let mut response = with_request_id_scope(request_id.clone(), next.run(request))
        .instrument(request_span)
        .await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started.elapsed().as_millis() as u64;
    metrics::record_http_request(&method, &path, response.status().as_u16(), latency_ms);
    tracing::info!(
        request_id = %request_id,
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );
    response
}

fn init_tracing(log_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).json().flatten_event(true).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
