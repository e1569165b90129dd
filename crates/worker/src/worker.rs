//! The worker loop: poll `claim_next`, drive the Lease Client's
//! auto-renewer, execute an opaque workload closure, and route the
//! result to `complete`/`abandon` — then always stop the renewer and
//! release, even if the workload panicked.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::client::{LeaseClient, TaskDispatcherClient};
use crate::config::WorkerConfig;

/// A background worker loop. Dropping the handle does not stop the loop;
/// call `shutdown()` and `wait()` for a clean exit.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn wait(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawns the worker loop. `handler` executes the opaque workload for a
/// claimed task's `task_data` and returns the output to record on
/// success, or an error to abandon the task on failure.
pub fn spawn<C, H, Fut>(client: Arc<C>, config: WorkerConfig, handler: H) -> WorkerHandle
where
    C: TaskDispatcherClient,
    H: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_loop(client, config, handler, shutdown_rx));
    WorkerHandle { shutdown_tx, task: Some(task) }
}

async fn run_loop<C, H, Fut>(
    client: Arc<C>,
    config: WorkerConfig,
    handler: H,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    C: TaskDispatcherClient,
    H: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
{
    let mut backoff = config.poll_backoff_initial;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let lease = Arc::new(LeaseClient::new(Arc::clone(&client), config.processor.clone()));
        match lease.acquire().await {
            Ok(Some((task_id, task_data))) => {
                backoff = config.poll_backoff_initial;
                info!(task_id, processor = %config.processor, "claimed task");
                run_claimed_task(&lease, &config, &handler, task_data).await;
            }
            Ok(None) => {
                if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                    break;
                }
                backoff = (backoff * 2).min(config.poll_backoff_max);
            }
            Err(error) => {
                warn!(%error, "claim_next failed, backing off");
                if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                    break;
                }
                backoff = (backoff * 2).min(config.poll_backoff_max);
            }
        }
    }
}

/// Runs one claimed task end to end. The workload runs inside its own
/// spawned task so a panic there surfaces as a `JoinError` rather than
/// unwinding through the renewer's cleanup — `stop_auto_renew` and
/// `release` always run afterward regardless of how the workload exited.
async fn run_claimed_task<C, H, Fut>(
    lease: &Arc<LeaseClient<C>>,
    config: &WorkerConfig,
    handler: &H,
    task_data: Value,
) where
    C: TaskDispatcherClient,
    H: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
{
    lease.start_auto_renew(config.heartbeat_interval).await;

    let outcome = tokio::spawn(handler(task_data)).await;
    match outcome {
        Ok(Ok(output)) => {
            if let Err(error) = lease.complete(output).await {
                warn!(%error, "failed to mark task complete");
            }
        }
        Ok(Err(error)) => {
            warn!(%error, "task workload failed, abandoning");
            if let Err(error) = lease.abandon().await {
                warn!(%error, "failed to abandon task after workload error");
            }
        }
        Err(join_error) => {
            warn!(%join_error, "task workload panicked, abandoning");
            if let Err(error) = lease.abandon().await {
                warn!(%error, "failed to abandon task after workload panic");
            }
        }
    }

    lease.stop_auto_renew().await;
    // `release` is a no-op when `complete`/`abandon` already cleared the
    // held task id; it only does work when neither ran to completion.
    lease.release().await;
}

async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_rx.changed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AcquireOutcome, DispatcherClientError, ReleaseOutcome, RenewOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time;

    #[derive(Default)]
    struct ScriptedDispatcherClient {
        claims: Mutex<Vec<AcquireOutcome>>,
        complete_count: AtomicUsize,
        abandon_count: AtomicUsize,
    }

    impl TaskDispatcherClient for ScriptedDispatcherClient {
        async fn claim_next(&self, _processor: &str) -> Result<AcquireOutcome, DispatcherClientError> {
            let mut claims = self.claims.lock().unwrap();
            Ok(if claims.is_empty() { AcquireOutcome::Empty } else { claims.remove(0) })
        }

        async fn heartbeat(&self, _task_id: i64, _processor: &str) -> Result<RenewOutcome, DispatcherClientError> {
            Ok(RenewOutcome::Renewed)
        }

        async fn complete(
            &self,
            _task_id: i64,
            _processor: &str,
            _output: Value,
        ) -> Result<ReleaseOutcome, DispatcherClientError> {
            self.complete_count.fetch_add(1, Ordering::SeqCst);
            Ok(ReleaseOutcome::Released)
        }

        async fn abandon(&self, _task_id: i64, _processor: &str) -> Result<ReleaseOutcome, DispatcherClientError> {
            self.abandon_count.fetch_add(1, Ordering::SeqCst);
            Ok(ReleaseOutcome::Released)
        }
    }

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            task_service_url: "http://unused".into(),
            processor: "w-test".into(),
            lease_ttl: Duration::from_secs(30),
            heartbeat_interval: Duration::from_millis(20),
            poll_backoff_initial: Duration::from_millis(10),
            poll_backoff_max: Duration::from_millis(40),
            log_filter: "info".into(),
        }
    }

    #[tokio::test]
    async fn successful_workload_completes_the_task() {
        time::pause();
        let dispatcher = Arc::new(ScriptedDispatcherClient::default());
        dispatcher.claims.lock().unwrap().push(AcquireOutcome::Granted {
            task_id: 1,
            task_data: serde_json::json!({"n": 2}),
        });

        let handle = spawn(Arc::clone(&dispatcher), test_config(), |data| async move {
            Ok(serde_json::json!({"squared": data["n"].as_i64().unwrap().pow(2)}))
        });

        for _ in 0..10 {
            time::advance(Duration::from_millis(15)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(dispatcher.complete_count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.abandon_count.load(Ordering::SeqCst), 0);
        handle.wait().await;
    }

    #[tokio::test]
    async fn failing_workload_abandons_the_task() {
        time::pause();
        let dispatcher = Arc::new(ScriptedDispatcherClient::default());
        dispatcher.claims.lock().unwrap().push(AcquireOutcome::Granted {
            task_id: 2,
            task_data: serde_json::json!({}),
        });

        let handle = spawn(Arc::clone(&dispatcher), test_config(), |_data| async move {
            Err(anyhow::anyhow!("workload exploded"))
        });

        for _ in 0..10 {
            time::advance(Duration::from_millis(15)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(dispatcher.abandon_count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.complete_count.load(Ordering::SeqCst), 0);
        handle.wait().await;
    }

    #[tokio::test]
    async fn panicking_workload_abandons_the_task_instead_of_crashing_the_loop() {
        time::pause();
        let dispatcher = Arc::new(ScriptedDispatcherClient::default());
        dispatcher.claims.lock().unwrap().push(AcquireOutcome::Granted {
            task_id: 3,
            task_data: serde_json::json!({}),
        });

        let handle = spawn(Arc::clone(&dispatcher), test_config(), |_data| async move {
            panic!("boom")
        });

        for _ in 0..10 {
            time::advance(Duration::from_millis(15)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(dispatcher.abandon_count.load(Ordering::SeqCst), 1);
        handle.wait().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop_without_claiming_further_tasks() {
        time::pause();
        let dispatcher = Arc::new(ScriptedDispatcherClient::default());

        let handle = spawn(Arc::clone(&dispatcher), test_config(), |data| async move { Ok(data) });
        handle.wait().await;

        // No panic, no hang: a clean shutdown on an idle loop.
        assert_eq!(dispatcher.complete_count.load(Ordering::SeqCst), 0);
    }
}
