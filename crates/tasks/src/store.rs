// Task Store + Task Dispatcher operations.
//
// `claim_next` coordinates two storage domains via claim-then-lease-then-
// confirm: tentatively update the task row, then call out to the Lease
// Manager, then commit or roll back depending on the answer. Every
// timestamp comparison and write uses Postgres's own `now()`, fetched once
// per transaction, never the process clock.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use warden_common::error::AppError;
use warden_common::types::Task;

use crate::lease_client::{AcquireOutcome, LeaseManagerClient, RenewOutcome};

#[derive(Clone)]
pub struct TaskStore<C: LeaseManagerClient> {
    pool: PgPool,
    lease_client: C,
    lease_ttl: Duration,
}

impl<C: LeaseManagerClient> TaskStore<C> {
    pub fn new(pool: PgPool, lease_client: C, lease_ttl: Duration) -> Self {
        Self { pool, lease_client, lease_ttl }
    }

    /// Claim the lowest-`id` claimable task: unstarted, or started but past
    /// its heartbeat deadline. Returns `Ok(None)` when nothing is claimable.
    pub async fn claim_next(&self, processor: &str) -> Result<Option<Task>, AppError> {
        let mut tx = self.pool.begin().await?;
        let now = db_now(&mut tx).await?;

        let candidate = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks \
             WHERE processed_at IS NULL AND (started_at IS NULL OR must_heartbeat_before <= $1) \
             ORDER BY id ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(candidate) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let tentative = sqlx::query_as::<_, Task>(
            "UPDATE tasks SET \
                started_at = $2, \
                last_heartbeat_at = $2, \
                must_heartbeat_before = $2 + ($3 * INTERVAL '1 second'), \
                processor = $4 \
             WHERE id = $1 \
             RETURNING *",
        )
        .bind(candidate.id)
        .bind(now)
        .bind(self.lease_ttl.as_secs_f64())
        .bind(processor)
        .fetch_one(&mut *tx)
        .await?;

        let resource = Task::lease_resource(tentative.id);
        match self.lease_client.acquire(&resource, processor).await {
            Ok(AcquireOutcome::Granted(_)) => {
                tx.commit().await?;
                Ok(Some(tentative))
            }
            Ok(AcquireOutcome::Conflict) => {
                // Dropping `tx` rolls back; the task remains unclaimed for the next poll.
                Err(AppError::conflict("lease manager denied lease for claimed task"))
            }
            Err(err) => Err(AppError::internal(err.to_string())),
        }
    }

    pub async fn heartbeat(&self, task_id: i64, processor: &str) -> Result<Task, AppError> {
        let mut tx = self.pool.begin().await?;
        let now = db_now(&mut tx).await?;
        let task = self.lock_task(&mut tx, task_id).await?;
        verify_ownership(&task, processor, now)?;

        let resource = Task::lease_resource(task_id);
        match self.lease_client.renew(&resource, processor).await {
            Ok(RenewOutcome::Renewed(_)) => {}
            Ok(RenewOutcome::Lost) => return Err(AppError::conflict("lease lost; task no longer owned")),
            Err(err) => return Err(AppError::internal(err.to_string())),
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks SET last_heartbeat_at = $2, must_heartbeat_before = $2 + ($3 * INTERVAL '1 second') \
             WHERE id = $1 RETURNING *",
        )
        .bind(task_id)
        .bind(now)
        .bind(self.lease_ttl.as_secs_f64())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// The lease release after a successful completion is best-effort: a
    /// failure here is logged, not propagated, because the task itself is
    /// already terminal once `processed_at` is committed.
    pub async fn complete(&self, task_id: i64, processor: &str, output: Value) -> Result<Task, AppError> {
        let mut tx = self.pool.begin().await?;
        let now = db_now(&mut tx).await?;
        let task = self.lock_task(&mut tx, task_id).await?;
        verify_ownership(&task, processor, now)?;
        if task.processed_at.is_some() {
            return Err(AppError::conflict("task already completed"));
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks SET processed_at = $2, task_output = $3 WHERE id = $1 RETURNING *",
        )
        .bind(task_id)
        .bind(now)
        .bind(&output)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let resource = Task::lease_resource(task_id);
        if let Err(err) = self.lease_client.release_resource(&resource).await {
            tracing::warn!(%err, task_id, "failed to release lease after task completion");
        }
        Ok(updated)
    }

    /// Clears ownership without forcing the heartbeat deadline-keyed
    /// predicate to diverge: setting `must_heartbeat_before = now` is
    /// sufficient to move the row into the *abandoned* state immediately.
    pub async fn abandon(&self, task_id: i64, processor: &str) -> Result<Task, AppError> {
        let mut tx = self.pool.begin().await?;
        let now = db_now(&mut tx).await?;
        let task = self.lock_task(&mut tx, task_id).await?;
        if task.processor.as_deref() != Some(processor) {
            return Err(AppError::conflict("abandon requested by non-owner"));
        }

        let updated = sqlx::query_as::<_, Task>(
            "UPDATE tasks SET must_heartbeat_before = $2, processor = NULL WHERE id = $1 RETURNING *",
        )
        .bind(task_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let resource = Task::lease_resource(task_id);
        if let Err(err) = self.lease_client.release_resource(&resource).await {
            tracing::warn!(%err, task_id, "failed to release lease on abandon");
        }
        Ok(updated)
    }

    pub async fn get(&self, task_id: i64) -> Result<Task, AppError> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("task {task_id} not found")))
    }

    pub async fn list_all(&self) -> Result<Vec<Task>, AppError> {
        Ok(sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY id ASC").fetch_all(&self.pool).await?)
    }

    pub async fn list_started(&self) -> Result<Vec<Task>, AppError> {
        Ok(sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE started_at IS NOT NULL AND processed_at IS NULL ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn list_processed(&self) -> Result<Vec<Task>, AppError> {
        Ok(sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE processed_at IS NOT NULL ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?)
    }

    async fn lock_task(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task_id: i64,
    ) -> Result<Task, AppError> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| AppError::not_found(format!("task {task_id} not found")))
    }
}

fn verify_ownership(task: &Task, processor: &str, now: DateTime<Utc>) -> Result<(), AppError> {
    let owns = task.processor.as_deref() == Some(processor);
    let unexpired = task.must_heartbeat_before.map(|deadline| deadline > now).unwrap_or(false);
    if owns && unexpired {
        Ok(())
    } else {
        Err(AppError::conflict("task is not owned by this processor or its lease has expired"))
    }
}

async fn db_now(tx: &mut Transaction<'_, Postgres>) -> Result<DateTime<Utc>, AppError> {
    sqlx::query_scalar::<_, DateTime<Utc>>("SELECT now()")
        .fetch_one(&mut **tx)
        .await
        .map_err(AppError::from)
}
