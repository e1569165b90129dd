//! `reqwest`-backed implementation of `TaskDispatcherClient`, used by the
//! standalone binary: typed outcome enums instead of bare status codes,
//! one error variant for transport/unexpected-response failures.

use std::time::Duration;

use serde_json::Value;
use warden_common::types::dto::{AbandonTaskRequest, ClaimNextRequest, CompleteTaskRequest, HeartbeatRequest, TaskResponse};

use crate::client::{AcquireOutcome, DispatcherClientError, ReleaseOutcome, RenewOutcome, TaskDispatcherClient};

#[derive(Clone)]
pub struct HttpTaskDispatcherClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTaskDispatcherClient {
    /// The client-side deadline must stay under `LEASE_TTL / 2` so a stuck
    /// call cannot silently let the lease expire out from under a poll.
    pub fn new(base_url: String, lease_ttl: Duration) -> Self {
        let timeout = lease_ttl / 2 - Duration::from_secs(1);
        let client = reqwest::Client::builder().timeout(timeout).build().expect("reqwest client");
        Self { base_url: base_url.trim_end_matches('/').to_string(), client }
    }
}

impl TaskDispatcherClient for HttpTaskDispatcherClient {
    async fn claim_next(&self, processor: &str) -> Result<AcquireOutcome, DispatcherClientError> {
        let response = self
            .client
            .post(format!("{}/tasks/next", self.base_url))
            .json(&ClaimNextRequest { processor: processor.to_string() })
            .send()
            .await
            .map_err(connection_failed)?;

        match response.status() {
            reqwest::StatusCode::ACCEPTED => {
                let task = response.json::<TaskResponse>().await.map_err(connection_failed)?;
                Ok(AcquireOutcome::Granted { task_id: task.id, task_data: task.task_data })
            }
            reqwest::StatusCode::NO_CONTENT => Ok(AcquireOutcome::Empty),
            status => Err(unexpected_status(status)),
        }
    }

    async fn heartbeat(&self, task_id: i64, processor: &str) -> Result<RenewOutcome, DispatcherClientError> {
        let response = self
            .client
            .put(format!("{}/tasks/{}/heartbeat", self.base_url, task_id))
            .json(&HeartbeatRequest { processor: processor.to_string() })
            .send()
            .await
            .map_err(connection_failed)?;

        match response.status() {
            reqwest::StatusCode::ACCEPTED => Ok(RenewOutcome::Renewed),
            reqwest::StatusCode::CONFLICT | reqwest::StatusCode::NOT_FOUND => Ok(RenewOutcome::Lost),
            status => Err(unexpected_status(status)),
        }
    }

    async fn complete(
        &self,
        task_id: i64,
        processor: &str,
        output: Value,
    ) -> Result<ReleaseOutcome, DispatcherClientError> {
        let response = self
            .client
            .put(format!("{}/tasks/{}/complete", self.base_url, task_id))
            .json(&CompleteTaskRequest { processor: processor.to_string(), output })
            .send()
            .await
            .map_err(connection_failed)?;

        match response.status() {
            reqwest::StatusCode::ACCEPTED => Ok(ReleaseOutcome::Released),
            reqwest::StatusCode::CONFLICT | reqwest::StatusCode::NOT_FOUND => Ok(ReleaseOutcome::NotFound),
            status => Err(unexpected_status(status)),
        }
    }

    async fn abandon(&self, task_id: i64, processor: &str) -> Result<ReleaseOutcome, DispatcherClientError> {
        let response = self
            .client
            .put(format!("{}/tasks/{}/abandon", self.base_url, task_id))
            .json(&AbandonTaskRequest { processor: processor.to_string() })
            .send()
            .await
            .map_err(connection_failed)?;

        match response.status() {
            reqwest::StatusCode::ACCEPTED => Ok(ReleaseOutcome::Released),
            reqwest::StatusCode::CONFLICT | reqwest::StatusCode::NOT_FOUND => Ok(ReleaseOutcome::NotFound),
            status => Err(unexpected_status(status)),
        }
    }
}

fn unexpected_status(status: reqwest::StatusCode) -> DispatcherClientError {
    DispatcherClientError::DispatcherError { message: format!("unexpected status {status}") }
}

fn connection_failed(_: reqwest::Error) -> DispatcherClientError {
    DispatcherClientError::ConnectionFailed
}
