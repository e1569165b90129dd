// Core domain types shared between the lease manager, task dispatcher, and worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single row in the Lease Store.
///
/// Derived state is never stored; see [`Lease::state`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Lease {
    pub id: i64,
    pub resource: String,
    pub holder: String,
    pub created_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Active,
    Expired,
    Released,
    Renewed,
}

impl Lease {
    /// Derived state as of `now`, per the predicates in the data model.
    pub fn state(&self, now: DateTime<Utc>) -> LeaseState {
        if self.released_at.is_some() {
            return LeaseState::Released;
        }
        if self.expires_at > now {
            if self.renewed_at.is_some() {
                LeaseState::Renewed
            } else {
                LeaseState::Active
            }
        } else {
            LeaseState::Expired
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && self.expires_at > now
    }
}

/// A single row in the Task Store. `task_data`/`task_output` are opaque JSON
/// blobs whose business meaning is out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub task_data: serde_json::Value,
    pub task_output: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub must_heartbeat_before: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processor: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Scheduled,
    Assigned,
    Abandoned,
    Completed,
}

impl Task {
    pub fn state(&self, now: DateTime<Utc>) -> TaskState {
        if self.processed_at.is_some() {
            return TaskState::Completed;
        }
        match (self.started_at, self.must_heartbeat_before) {
            (None, _) => TaskState::Scheduled,
            (Some(_), Some(deadline)) if deadline > now => TaskState::Assigned,
            (Some(_), _) => TaskState::Abandoned,
        }
    }

    /// Resource name the Lease Manager uses to track this task's lease.
    pub fn lease_resource(task_id: i64) -> String {
        format!("task:{task_id}")
    }
}

/// Request/response DTOs for the HTTP surface. Kept alongside the domain
/// types because both services and the worker client share them verbatim.
pub mod dto {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AcquireLeaseRequest {
        pub resource: String,
        pub holder: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct RenewLeaseRequest {
        pub resource: String,
        pub holder: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LeaseResponse {
        pub id: i64,
        pub resource: String,
        pub holder: String,
        pub created_at: DateTime<Utc>,
        pub renewed_at: Option<DateTime<Utc>>,
        pub expires_at: DateTime<Utc>,
    }

    impl From<Lease> for LeaseResponse {
        fn from(lease: Lease) -> Self {
            Self {
                id: lease.id,
                resource: lease.resource,
                holder: lease.holder,
                created_at: lease.created_at,
                renewed_at: lease.renewed_at,
                expires_at: lease.expires_at,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ListLeasesQuery {
        pub state: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ClaimNextRequest {
        pub processor: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct HeartbeatRequest {
        pub processor: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct HeartbeatResponse {
        pub must_heartbeat_before: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CompleteTaskRequest {
        pub processor: String,
        pub output: serde_json::Value,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct AbandonTaskRequest {
        pub processor: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TaskResponse {
        pub id: i64,
        pub task_data: serde_json::Value,
        pub task_output: Option<serde_json::Value>,
        pub scheduled_at: DateTime<Utc>,
        pub started_at: Option<DateTime<Utc>>,
        pub last_heartbeat_at: Option<DateTime<Utc>>,
        pub must_heartbeat_before: Option<DateTime<Utc>>,
        pub processed_at: Option<DateTime<Utc>>,
        pub processor: Option<String>,
    }

    impl From<Task> for TaskResponse {
        fn from(task: Task) -> Self {
            Self {
                id: task.id,
                task_data: task.task_data,
                task_output: task.task_output,
                scheduled_at: task.scheduled_at,
                started_at: task.started_at,
                last_heartbeat_at: task.last_heartbeat_at,
                must_heartbeat_before: task.must_heartbeat_before,
                processed_at: task.processed_at,
                processor: task.processor,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct HealthResponse {
        pub status: &'static str,
        pub timestamp: DateTime<Utc>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DispatcherHealthResponse {
        pub status: &'static str,
        pub timestamp: DateTime<Utc>,
        pub lease_manager: &'static str,
    }
}
