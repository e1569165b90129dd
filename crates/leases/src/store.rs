// Lease Store + Lease Manager operations.
//
// Uniqueness of the active lease per resource is enforced by an explicit
// `SELECT ... FOR UPDATE` lock over all rows for that resource before any
// write, never by a schema constraint (`resource` alone cannot be unique:
// history rows for expired/released leases are kept). All expiry math runs
// against the database's own clock (`now()` inside SQL), never the
// application process's clock, so a skewed caller can never manufacture a
// longer-lived lease.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use warden_common::error::AppError;
use warden_common::types::{Lease, LeaseState};

#[derive(Clone)]
pub struct LeaseStore {
    pool: PgPool,
    ttl: Duration,
}

impl LeaseStore {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    /// §4.B `acquire`: insert a fresh row iff no row for `resource` is
    /// currently active. Re-acquiring after expiry inserts a new row rather
    /// than overwriting the old one, preserving history (§9).
    pub async fn acquire(&self, resource: &str, holder: &str) -> Result<Lease, AppError> {
        let mut tx = self.pool.begin().await?;

        // `FOR UPDATE` over `WHERE resource = $1` locks nothing when the
        // resource has no rows yet, so two first-time acquires on the same
        // resource would both see an empty set and both insert. Serialize on
        // the resource itself before that check: concurrent callers queue on
        // this lock and the transaction that commits first wins the row race
        // below.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(resource)
            .execute(&mut *tx)
            .await?;

        let rows = self.lock_resource_rows(&mut tx, resource).await?;
        let now = db_now(&mut tx).await?;

        if rows.iter().any(|row| row.is_active(now)) {
            return Err(AppError::conflict(format!(
                "resource '{resource}' already has an active lease"
            )));
        }

        let lease = sqlx::query_as::<_, Lease>(
            "INSERT INTO leases (resource, holder, created_at, expires_at)
             VALUES ($1, $2, now(), now() + ($3 * INTERVAL '1 second'))
             RETURNING id, resource, holder, created_at, renewed_at, released_at, expires_at",
        )
        .bind(resource)
        .bind(holder)
        .bind(self.ttl.as_secs_f64())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(lease)
    }

    /// §4.B `renew`: extend the active lease matching `resource`+`holder`.
    /// A resource with no rows at all is `NotFound`; a resource whose only
    /// matching-holder row has lapsed is `Conflict` (lost lease) per the
    /// spec's explicit choice not to silently re-acquire on renew.
    pub async fn renew(&self, resource: &str, holder: &str) -> Result<Lease, AppError> {
        let mut tx = self.pool.begin().await?;
        let rows = self.lock_resource_rows(&mut tx, resource).await?;

        if rows.is_empty() {
            return Err(AppError::not_found(format!("no lease found for resource '{resource}'")));
        }

        let now = db_now(&mut tx).await?;
        let active = rows.iter().find(|row| row.holder == holder && row.is_active(now));

        let Some(active) = active else {
            return Err(AppError::conflict(format!(
                "lease for resource '{resource}' held by '{holder}' is no longer active"
            )));
        };

        let renewed = sqlx::query_as::<_, Lease>(
            "UPDATE leases
             SET renewed_at = now(), expires_at = now() + ($2 * INTERVAL '1 second')
             WHERE id = $1
             RETURNING id, resource, holder, created_at, renewed_at, released_at, expires_at",
        )
        .bind(active.id)
        .bind(self.ttl.as_secs_f64())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(renewed)
    }

    /// §4.B `release`: idempotent. A second release on an already-released
    /// row is a no-op success, not an error.
    pub async fn release(&self, id: i64) -> Result<Lease, AppError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Lease>(
            "SELECT id, resource, holder, created_at, renewed_at, released_at, expires_at
             FROM leases WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(existing) = existing else {
            return Err(AppError::not_found(format!("no lease with id {id}")));
        };

        if existing.released_at.is_some() {
            tx.commit().await?;
            return Ok(existing);
        }

        let released = sqlx::query_as::<_, Lease>(
            "UPDATE leases SET released_at = now() WHERE id = $1
             RETURNING id, resource, holder, created_at, renewed_at, released_at, expires_at",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(released)
    }

    /// §4.B `list_by_state`. An unrecognized or absent `state` defaults to
    /// `all` rather than erroring (§6 permissive-query-parsing note).
    pub async fn list_by_state(&self, state: Option<&str>) -> Result<Vec<Lease>, AppError> {
        let rows = sqlx::query_as::<_, Lease>(
            "SELECT id, resource, holder, created_at, renewed_at, released_at, expires_at
             FROM leases ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let filtered = match state {
            Some("active") => rows.into_iter().filter(|l| l.state(now) == LeaseState::Active).collect(),
            Some("expired") => rows.into_iter().filter(|l| l.state(now) == LeaseState::Expired).collect(),
            Some("released") => rows.into_iter().filter(|l| l.state(now) == LeaseState::Released).collect(),
            Some("renewed") => rows.into_iter().filter(|l| l.state(now) == LeaseState::Renewed).collect(),
            _ => rows,
        };
        Ok(filtered)
    }

    async fn lock_resource_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        resource: &str,
    ) -> Result<Vec<Lease>, AppError> {
        let rows = sqlx::query_as::<_, Lease>(
            "SELECT id, resource, holder, created_at, renewed_at, released_at, expires_at
             FROM leases WHERE resource = $1 FOR UPDATE",
        )
        .bind(resource)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }
}

async fn db_now(tx: &mut Transaction<'_, Postgres>) -> Result<DateTime<Utc>, AppError> {
    let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()").fetch_one(&mut **tx).await?;
    Ok(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    /// Postgres-gated integration tests. Skipped (not failed) when
    /// `LEASE_MANAGER_TEST_DATABASE_URL` is unset, so the rest of the suite
    /// stays runnable without a database.
    async fn test_store() -> Option<LeaseStore> {
        let Ok(database_url) = std::env::var("LEASE_MANAGER_TEST_DATABASE_URL") else {
            eprintln!("skipping: LEASE_MANAGER_TEST_DATABASE_URL not set");
            return None;
        };
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .expect("failed to connect to test database");
        sqlx::query("TRUNCATE leases RESTART IDENTITY").execute(&pool).await.ok();
        Some(LeaseStore::new(pool, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn acquire_then_acquire_again_conflicts() {
        let Some(store) = test_store().await else { return };
        let resource = "task:acquire-conflict";

        let first = store.acquire(resource, "w-A").await.expect("first acquire should succeed");
        assert!(first.released_at.is_none());

        let second = store.acquire(resource, "w-B").await;
        assert!(matches!(second, Err(e) if e.code == warden_common::error::ErrorCode::Conflict));
    }

    #[tokio::test]
    async fn acquire_after_forced_expiry_inserts_new_row_and_keeps_history() {
        let Some(store) = test_store().await else { return };
        let resource = "task:expiry-history";

        let first = store.acquire(resource, "w-A").await.unwrap();
        sqlx::query("UPDATE leases SET expires_at = now() - interval '1 second' WHERE id = $1")
            .bind(first.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let second = store.acquire(resource, "w-B").await.expect("acquire after expiry should succeed");
        assert_ne!(second.id, first.id);

        let all = store.list_by_state(Some("all")).await.unwrap();
        assert!(all.iter().any(|l| l.id == first.id));
        assert!(all.iter().any(|l| l.id == second.id));
    }

    #[tokio::test]
    async fn renew_unknown_resource_is_not_found() {
        let Some(store) = test_store().await else { return };
        let result = store.renew("task:never-existed", "w-A").await;
        assert!(matches!(result, Err(e) if e.code == warden_common::error::ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn renew_after_expiry_is_conflict() {
        let Some(store) = test_store().await else { return };
        let resource = "task:renew-after-expiry";

        let lease = store.acquire(resource, "w-A").await.unwrap();
        sqlx::query("UPDATE leases SET expires_at = now() - interval '1 second' WHERE id = $1")
            .bind(lease.id)
            .execute(&store.pool)
            .await
            .unwrap();

        let result = store.renew(resource, "w-A").await;
        assert!(matches!(result, Err(e) if e.code == warden_common::error::ErrorCode::Conflict));
    }

    #[tokio::test]
    async fn renew_extends_expiry_monotonically() {
        let Some(store) = test_store().await else { return };
        let resource = "task:renew-monotonic";

        let lease = store.acquire(resource, "w-A").await.unwrap();
        let renewed = store.renew(resource, "w-A").await.expect("renew should succeed");
        assert!(renewed.expires_at >= lease.expires_at);
        assert!(renewed.renewed_at.is_some());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let Some(store) = test_store().await else { return };
        let lease = store.acquire("task:release-idempotent", "w-A").await.unwrap();

        let first_release = store.release(lease.id).await.unwrap();
        let second_release = store.release(lease.id).await.unwrap();

        assert_eq!(first_release.released_at, second_release.released_at);
    }

    #[tokio::test]
    async fn release_unknown_id_is_not_found() {
        let Some(store) = test_store().await else { return };
        let result = store.release(i64::MAX).await;
        assert!(matches!(result, Err(e) if e.code == warden_common::error::ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn concurrent_acquire_on_same_resource_yields_exactly_one_winner() {
        let Some(store) = test_store().await else { return };
        let resource = "task:contention";

        let store_a = store.clone();
        let store_b = store;
        let (a, b) = tokio::join!(
            store_a.acquire(resource, "w-A"),
            store_b.acquire(resource, "w-B"),
        );

        let successes = [a.is_ok(), b.is_ok()].into_iter().filter(|ok| *ok).count();
        assert_eq!(successes, 1, "exactly one concurrent acquire should win");
    }
}
