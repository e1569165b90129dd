// Task Dispatcher's HTTP client into the Lease Manager service.
//
// Trait-based so `store.rs` can be tested against a fake without a second
// Postgres-backed service running. Mirrors the shape of the worker-side
// lease client: typed outcome enums instead of bare status codes, and a
// single `LeaseClientError` for transport/unexpected-response failures.

use std::time::Duration;

use warden_common::types::dto::{AcquireLeaseRequest, LeaseResponse, RenewLeaseRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(LeaseResponse),
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed(LeaseResponse),
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseClientError {
    ConnectionFailed,
    LeaseManagerError { message: String },
}

impl std::fmt::Display for LeaseClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "lease manager client: connection failed"),
            Self::LeaseManagerError { message } => {
                write!(f, "lease manager client: {message}")
            }
        }
    }
}

impl std::error::Error for LeaseClientError {}

/// Abstraction over Lease Manager HTTP calls. Trait-based for testability.
pub trait LeaseManagerClient: Send + Sync + 'static {
    fn acquire(
        &self,
        resource: &str,
        holder: &str,
    ) -> impl std::future::Future<Output = Result<AcquireOutcome, LeaseClientError>> + Send;

    fn renew(
        &self,
        resource: &str,
        holder: &str,
    ) -> impl std::future::Future<Output = Result<RenewOutcome, LeaseClientError>> + Send;

    /// The Task Store never persists a lease id, so release happens by
    /// resource: look up whichever lease is currently active for it (if
    /// any) and release that row.
    fn release_resource(
        &self,
        resource: &str,
    ) -> impl std::future::Future<Output = Result<ReleaseOutcome, LeaseClientError>> + Send;

    fn healthy(&self) -> impl std::future::Future<Output = bool> + Send;
}

/// Real `reqwest`-backed implementation, used by the standalone binary.
#[derive(Clone)]
pub struct HttpLeaseManagerClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLeaseManagerClient {
    /// The client-side deadline must stay under `LEASE_TTL / 2` so a stuck
    /// call cannot silently let the lease expire out from under a request.
    pub fn new(base_url: String, lease_ttl: Duration) -> Self {
        let timeout = lease_ttl / 2 - Duration::from_secs(1);
        let client = reqwest::Client::builder().timeout(timeout).build().expect("reqwest client");
        Self { base_url: base_url.trim_end_matches('/').to_string(), client }
    }
}

impl LeaseManagerClient for HttpLeaseManagerClient {
    async fn acquire(&self, resource: &str, holder: &str) -> Result<AcquireOutcome, LeaseClientError> {
        let response = self
            .client
            .post(format!("{}/leases", self.base_url))
            .json(&AcquireLeaseRequest { resource: resource.to_string(), holder: holder.to_string() })
            .send()
            .await
            .map_err(|_| LeaseClientError::ConnectionFailed)?;

        match response.status() {
            reqwest::StatusCode::CREATED => {
                let lease = response.json::<LeaseResponse>().await.map_err(connection_failed)?;
                Ok(AcquireOutcome::Granted(lease))
            }
            reqwest::StatusCode::CONFLICT => Ok(AcquireOutcome::Conflict),
            status => Err(unexpected_status(status)),
        }
    }

    async fn renew(&self, resource: &str, holder: &str) -> Result<RenewOutcome, LeaseClientError> {
        let response = self
            .client
            .put(format!("{}/leases/renew", self.base_url))
            .json(&RenewLeaseRequest { resource: resource.to_string(), holder: holder.to_string() })
            .send()
            .await
            .map_err(|_| LeaseClientError::ConnectionFailed)?;

        match response.status() {
            reqwest::StatusCode::CREATED => {
                let lease = response.json::<LeaseResponse>().await.map_err(connection_failed)?;
                Ok(RenewOutcome::Renewed(lease))
            }
            reqwest::StatusCode::CONFLICT | reqwest::StatusCode::NOT_FOUND => Ok(RenewOutcome::Lost),
            status => Err(unexpected_status(status)),
        }
    }

    async fn release_resource(&self, resource: &str) -> Result<ReleaseOutcome, LeaseClientError> {
        let response = self
            .client
            .get(format!("{}/leases?state=active", self.base_url))
            .send()
            .await
            .map_err(|_| LeaseClientError::ConnectionFailed)?;
        if !response.status().is_success() {
            return Err(unexpected_status(response.status()));
        }
        let active = response.json::<Vec<LeaseResponse>>().await.map_err(connection_failed)?;
        let Some(lease) = active.into_iter().find(|lease| lease.resource == resource) else {
            return Ok(ReleaseOutcome::NotFound);
        };

        let response = self
            .client
            .delete(format!("{}/leases/{}", self.base_url, lease.id))
            .send()
            .await
            .map_err(|_| LeaseClientError::ConnectionFailed)?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(ReleaseOutcome::Released),
            reqwest::StatusCode::NOT_FOUND => Ok(ReleaseOutcome::NotFound),
            status => Err(unexpected_status(status)),
        }
    }

    async fn healthy(&self) -> bool {
        self.client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

fn unexpected_status(status: reqwest::StatusCode) -> LeaseClientError {
    LeaseClientError::LeaseManagerError { message: format!("unexpected status {status}") }
}

fn connection_failed(_: reqwest::Error) -> LeaseClientError {
    LeaseClientError::ConnectionFailed
}
