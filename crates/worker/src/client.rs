//! Worker-side Lease Client: a stateful handle over one claimed task's
//! place in the Task Dispatcher, auto-renewing on a cooperative
//! interval until told to stop, complete, or abandon. A lost lease is
//! terminal: the handle stops the renewer and does not retry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Granted { task_id: i64, task_data: Value },
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherClientError {
    ConnectionFailed,
    DispatcherError { message: String },
}

impl std::fmt::Display for DispatcherClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "task dispatcher client: connection failed"),
            Self::DispatcherError { message } => write!(f, "task dispatcher client: {message}"),
        }
    }
}

impl std::error::Error for DispatcherClientError {}

/// Abstraction over the Task Dispatcher's task-lifecycle HTTP calls.
/// Trait-based so the Lease Client can be driven by a mock in tests.
pub trait TaskDispatcherClient: Send + Sync + 'static {
    fn claim_next(
        &self,
        processor: &str,
    ) -> impl std::future::Future<Output = Result<AcquireOutcome, DispatcherClientError>> + Send;

    fn heartbeat(
        &self,
        task_id: i64,
        processor: &str,
    ) -> impl std::future::Future<Output = Result<RenewOutcome, DispatcherClientError>> + Send;

    fn complete(
        &self,
        task_id: i64,
        processor: &str,
        output: Value,
    ) -> impl std::future::Future<Output = Result<ReleaseOutcome, DispatcherClientError>> + Send;

    fn abandon(
        &self,
        task_id: i64,
        processor: &str,
    ) -> impl std::future::Future<Output = Result<ReleaseOutcome, DispatcherClientError>> + Send;
}

/// Snapshot of what the handle currently believes about its lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Idle,
    Held,
    Lost,
}

/// A stateful handle over one claimed task. Calls are serialized
/// through `inner`'s mutex so a late renewal response can never
/// overlap with a caller-initiated `complete`/`abandon`.
pub struct LeaseClient<C: TaskDispatcherClient> {
    client: Arc<C>,
    holder: String,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<LeaseState>,
    renew_task: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

struct Inner {
    task_id: Option<i64>,
}

impl<C: TaskDispatcherClient> LeaseClient<C> {
    pub fn new(client: Arc<C>, holder: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(LeaseState::Idle);
        Self {
            client,
            holder: holder.into(),
            inner: Mutex::new(Inner { task_id: None }),
            state_tx,
            renew_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LeaseState {
        *self.state_tx.subscribe().borrow()
    }

    /// Polls the Dispatcher for the next task. On `Granted`, records the
    /// task id so `renew`/`release` know what to operate on.
    pub async fn acquire(&self) -> Result<Option<(i64, Value)>, DispatcherClientError> {
        match self.client.claim_next(&self.holder).await? {
            AcquireOutcome::Granted { task_id, task_data } => {
                self.inner.lock().await.task_id = Some(task_id);
                let _ = self.state_tx.send(LeaseState::Held);
                Ok(Some((task_id, task_data)))
            }
            AcquireOutcome::Empty => Ok(None),
        }
    }

    /// Spawns a cooperative periodic task calling `heartbeat` every
    /// `interval`. Callers must pick an interval strictly less than half
    /// of `LEASE_TTL` so one missed beat is tolerated.
    pub async fn start_auto_renew(self: &Arc<Self>, interval: Duration) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
                if this.renew().await == RenewOutcome::Lost {
                    break;
                }
            }
        });
        *self.renew_task.lock().await = Some((handle, shutdown_tx));
    }

    /// Cancels the periodic renewer and awaits its exit. Does not
    /// release the lease.
    pub async fn stop_auto_renew(&self) {
        if let Some((handle, shutdown_tx)) = self.renew_task.lock().await.take() {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
        }
    }

    async fn renew(&self) -> RenewOutcome {
        let task_id = match self.inner.lock().await.task_id {
            Some(id) => id,
            None => return RenewOutcome::Lost,
        };
        match self.client.heartbeat(task_id, &self.holder).await {
            Ok(RenewOutcome::Renewed) => {
                debug!(task_id, holder = %self.holder, "lease renewed");
                RenewOutcome::Renewed
            }
            Ok(RenewOutcome::Lost) | Err(_) => {
                warn!(task_id, holder = %self.holder, "lease lost during renew");
                self.inner.lock().await.task_id = None;
                let _ = self.state_tx.send(LeaseState::Lost);
                RenewOutcome::Lost
            }
        }
    }

    /// Marks the task complete and releases it. A second call with
    /// nothing held is a no-op, not an error.
    pub async fn complete(&self, output: Value) -> Result<ReleaseOutcome, DispatcherClientError> {
        let task_id = self.inner.lock().await.task_id.take();
        let Some(task_id) = task_id else { return Ok(ReleaseOutcome::NotFound) };
        let outcome = self.client.complete(task_id, &self.holder, output).await?;
        let _ = self.state_tx.send(LeaseState::Idle);
        Ok(outcome)
    }

    /// Abandons the task without marking it processed, clearing the
    /// held state so a subsequent poll can claim something new.
    pub async fn abandon(&self) -> Result<ReleaseOutcome, DispatcherClientError> {
        let task_id = self.inner.lock().await.task_id.take();
        let Some(task_id) = task_id else { return Ok(ReleaseOutcome::NotFound) };
        let outcome = self.client.abandon(task_id, &self.holder).await?;
        let _ = self.state_tx.send(LeaseState::Idle);
        Ok(outcome)
    }

    /// Best-effort safety net: if `complete`/`abandon` never ran (the
    /// workload panicked before either fired), abandon whatever is
    /// still held so the lease does not leak.
    pub async fn release(&self) {
        if self.inner.lock().await.task_id.is_some() {
            if let Err(error) = self.abandon().await {
                warn!(holder = %self.holder, %error, "best-effort release failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time;

    #[derive(Clone, Default)]
    struct MockDispatcherClient {
        claim_responses: Arc<Mutex<Vec<Result<AcquireOutcome, DispatcherClientError>>>>,
        heartbeat_responses: Arc<Mutex<Vec<Result<RenewOutcome, DispatcherClientError>>>>,
        heartbeat_count: Arc<AtomicUsize>,
        abandon_count: Arc<AtomicUsize>,
    }

    impl MockDispatcherClient {
        async fn push_claim(&self, outcome: Result<AcquireOutcome, DispatcherClientError>) {
            self.claim_responses.lock().await.push(outcome);
        }

        async fn push_heartbeat(&self, outcome: Result<RenewOutcome, DispatcherClientError>) {
            self.heartbeat_responses.lock().await.push(outcome);
        }

        fn heartbeat_calls(&self) -> usize {
            self.heartbeat_count.load(Ordering::SeqCst)
        }
    }

    impl TaskDispatcherClient for MockDispatcherClient {
        async fn claim_next(&self, _processor: &str) -> Result<AcquireOutcome, DispatcherClientError> {
            let mut responses = self.claim_responses.lock().await;
            if responses.is_empty() { Ok(AcquireOutcome::Empty) } else { responses.remove(0) }
        }

        async fn heartbeat(
            &self,
            _task_id: i64,
            _processor: &str,
        ) -> Result<RenewOutcome, DispatcherClientError> {
            self.heartbeat_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.heartbeat_responses.lock().await;
            if responses.is_empty() { Ok(RenewOutcome::Renewed) } else { responses.remove(0) }
        }

        async fn complete(
            &self,
            _task_id: i64,
            _processor: &str,
            _output: Value,
        ) -> Result<ReleaseOutcome, DispatcherClientError> {
            Ok(ReleaseOutcome::Released)
        }

        async fn abandon(
            &self,
            _task_id: i64,
            _processor: &str,
        ) -> Result<ReleaseOutcome, DispatcherClientError> {
            self.abandon_count.fetch_add(1, Ordering::SeqCst);
            Ok(ReleaseOutcome::Released)
        }
    }

    #[tokio::test]
    async fn acquire_records_task_id_and_reports_held() {
        let mock = MockDispatcherClient::default();
        mock.push_claim(Ok(AcquireOutcome::Granted { task_id: 7, task_data: serde_json::json!({}) }))
            .await;
        let lease = Arc::new(LeaseClient::new(Arc::new(mock), "w-A"));

        let claimed = lease.acquire().await.unwrap();
        assert_eq!(claimed.map(|(id, _)| id), Some(7));
        assert_eq!(lease.state(), LeaseState::Held);
    }

    #[tokio::test]
    async fn acquire_returns_none_when_dispatcher_is_empty() {
        let mock = MockDispatcherClient::default();
        let lease = Arc::new(LeaseClient::new(Arc::new(mock), "w-A"));

        assert_eq!(lease.acquire().await.unwrap(), None);
        assert_eq!(lease.state(), LeaseState::Idle);
    }

    #[tokio::test]
    async fn auto_renew_calls_heartbeat_on_interval() {
        time::pause();
        let mock = MockDispatcherClient::default();
        mock.push_claim(Ok(AcquireOutcome::Granted { task_id: 1, task_data: serde_json::json!({}) }))
            .await;
        let mock_handle = mock.clone();
        let lease = Arc::new(LeaseClient::new(Arc::new(mock), "w-A"));
        lease.acquire().await.unwrap();

        lease.start_auto_renew(Duration::from_millis(50)).await;
        time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        assert!(mock_handle.heartbeat_calls() >= 1);
        lease.stop_auto_renew().await;
    }

    #[tokio::test]
    async fn lost_lease_stops_the_renewer_without_retrying_acquire() {
        time::pause();
        let mock = MockDispatcherClient::default();
        mock.push_claim(Ok(AcquireOutcome::Granted { task_id: 1, task_data: serde_json::json!({}) }))
            .await;
        mock.push_heartbeat(Ok(RenewOutcome::Lost)).await;
        let mock_handle = mock.clone();
        let lease = Arc::new(LeaseClient::new(Arc::new(mock), "w-A"));
        lease.acquire().await.unwrap();

        lease.start_auto_renew(Duration::from_millis(50)).await;
        time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        assert_eq!(lease.state(), LeaseState::Lost);
        let calls_at_loss = mock_handle.heartbeat_calls();

        // Advancing further must not produce additional heartbeat calls:
        // the renewer already exited and does not retry.
        time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(mock_handle.heartbeat_calls(), calls_at_loss);

        lease.stop_auto_renew().await;
    }

    #[tokio::test]
    async fn complete_releases_the_held_task_and_is_idempotent() {
        let mock = MockDispatcherClient::default();
        mock.push_claim(Ok(AcquireOutcome::Granted { task_id: 3, task_data: serde_json::json!({}) }))
            .await;
        let lease = Arc::new(LeaseClient::new(Arc::new(mock), "w-A"));
        lease.acquire().await.unwrap();

        assert_eq!(
            lease.complete(serde_json::json!({"ok": true})).await.unwrap(),
            ReleaseOutcome::Released
        );
        assert_eq!(lease.state(), LeaseState::Idle);
        assert_eq!(lease.complete(serde_json::json!({})).await.unwrap(), ReleaseOutcome::NotFound);
    }

    #[tokio::test]
    async fn release_is_a_noop_after_complete_already_ran() {
        let mock = MockDispatcherClient::default();
        mock.push_claim(Ok(AcquireOutcome::Granted { task_id: 4, task_data: serde_json::json!({}) }))
            .await;
        let mock_handle = mock.clone();
        let lease = Arc::new(LeaseClient::new(Arc::new(mock), "w-A"));
        lease.acquire().await.unwrap();
        lease.complete(serde_json::json!({})).await.unwrap();

        lease.release().await;
        assert_eq!(mock_handle.abandon_count.load(Ordering::SeqCst), 0);
    }
}
