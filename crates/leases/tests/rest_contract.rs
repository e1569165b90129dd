//! End-to-end HTTP contract tests against a real router + Postgres.
//! Skipped (not failed) when `LEASE_MANAGER_TEST_DATABASE_URL` is unset.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use warden_common::types::dto::{AcquireLeaseRequest, LeaseResponse};
use warden_leases::api::{router, AppState};
use warden_leases::metrics::LeaseManagerMetrics;
use warden_leases::store::LeaseStore;

async fn test_app() -> Option<axum::Router> {
    let Ok(database_url) = std::env::var("LEASE_MANAGER_TEST_DATABASE_URL") else {
        eprintln!("skipping: LEASE_MANAGER_TEST_DATABASE_URL not set");
        return None;
    };
    let pool = PgPoolOptions::new().max_connections(10).connect(&database_url).await.unwrap();
    sqlx::query("TRUNCATE leases RESTART IDENTITY").execute(&pool).await.ok();
    let state = AppState {
        store: LeaseStore::new(pool, Duration::from_secs(30)),
        metrics: Arc::new(LeaseManagerMetrics::default()),
    };
    Some(router(state))
}

async fn post_json(
    app: &axum::Router,
    uri: &str,
    json: &impl serde::Serialize,
) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(json).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value =
        if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

/// Two concurrent acquirers on the same resource: exactly one wins, the
/// other observes 409 conflict.
#[tokio::test]
async fn contention_yields_exactly_one_winner() {
    let Some(app) = test_app().await else { return };

    let request_a = AcquireLeaseRequest { resource: "task:3".into(), holder: "w-A".into() };
    let request_b = AcquireLeaseRequest { resource: "task:3".into(), holder: "w-B".into() };

    let (result_a, result_b) =
        tokio::join!(post_json(&app, "/leases", &request_a), post_json(&app, "/leases", &request_b));

    let statuses = [result_a.0, result_b.0];
    let winners = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let losers = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!(winners, 1, "exactly one concurrent acquire should be accepted");
    assert_eq!(losers, 1, "the other concurrent acquire should see 409 conflict");
}

/// Releasing the same lease twice is idempotent and leaves one terminal row
/// with a single `released_at`.
#[tokio::test]
async fn idempotent_release_returns_200_both_times() {
    let Some(app) = test_app().await else { return };

    let acquire = AcquireLeaseRequest { resource: "task:6".into(), holder: "w-A".into() };
    let (status, body_json) = post_json(&app, "/leases", &acquire).await;
    assert_eq!(status, StatusCode::CREATED);
    let lease: LeaseResponse = serde_json::from_value(body_json).unwrap();

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/leases/{}", lease.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/leases/{}", lease.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
}

#[tokio::test]
async fn list_leases_filters_by_state() {
    let Some(app) = test_app().await else { return };

    let acquire = AcquireLeaseRequest { resource: "task:list".into(), holder: "w-A".into() };
    post_json(&app, "/leases", &acquire).await;

    let response = app
        .oneshot(Request::builder().uri("/leases?state=active").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let leases: Vec<LeaseResponse> = serde_json::from_slice(&bytes).unwrap();
    assert!(leases.iter().any(|lease| lease.resource == "task:list"));
}
