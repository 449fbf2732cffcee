//! Worker pool / scheduler: drives a [`Dag`] to completion by dispatching
//! ready nodes through an injected [`Runner`], wrapped in the retry engine
//! (C1) when a policy is configured.
//!
//! The scheduler holds no lock of its own across a `Runner` call — the only
//! shared state it touches is the DAG's mutex, acquired and released once
//! per node per wave.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::dag::Dag;
use crate::retry::{classify, execute_with_retry, RetryError, RetryPolicy};

/// Idle-poll interval when no nodes are ready but the DAG is not complete.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Error surfaced by a [`Runner`]. Implementing [`ExitInfo`] lets the
/// scheduler's retry wrapping classify the failure the same way a process
/// exit code and stderr would be classified.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RunnerError {
    pub message: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub was_cancelled: bool,
}

impl RunnerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: None,
            stderr: String::new(),
            was_cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: "cancelled".to_string(),
            exit_code: None,
            stderr: String::new(),
            was_cancelled: true,
        }
    }
}

/// Extracted exit info consumed by the retry classifier.
pub trait ExitInfo {
    fn exit_code(&self) -> Option<i32>;
    fn stderr(&self) -> &str;
    fn was_cancelled(&self) -> bool;
}

impl ExitInfo for RunnerError {
    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn stderr(&self) -> &str {
        &self.stderr
    }

    fn was_cancelled(&self) -> bool {
        self.was_cancelled
    }
}

/// The single collaborator capability the scheduler dispatches task
/// execution through. Every external call made from inside a `Runner`
/// implementation must itself pass through the C2/C3/C4 stack configured
/// for that resource class — the scheduler does not acquire slots, call
/// the breaker, or consume a rate limiter on the Runner's behalf.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run_task(&self, cancel: &CancellationToken, task: &str) -> Result<String, RunnerError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Runner) {}
};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Width of the dispatch semaphore. Values `<= 0` fall back to 4.
    pub max_concurrent: i64,
    /// Retry policy applied to each `RunTask` call. `None` disables retry
    /// (a single attempt, any failure is terminal for the node).
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_policy: None,
        }
    }
}

impl SchedulerConfig {
    fn normalized_concurrency(&self) -> usize {
        if self.max_concurrent <= 0 {
            4
        } else {
            self.max_concurrent as usize
        }
    }
}

/// Error returned by [`run_to_completion`] when the run is cancelled
/// mid-flight. Individual node outcomes are never surfaced here — they
/// live on the DAG's nodes.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("scheduler run cancelled")]
pub struct SchedulerCancelled;

/// Drive `dag` to completion (every node terminal) or until `cancel` fires.
///
/// Each wave marks every currently-ready node `Running`, acquires one
/// permit from a semaphore of width `config.max_concurrent`, and spawns a
/// worker per node. The scheduler waits for the whole wave before
/// recomputing ready nodes, so a node's dependencies are always `Completed`
/// by the time it starts.
pub async fn run_to_completion(
    cancel: CancellationToken,
    dag: Arc<Dag>,
    runner: Arc<dyn Runner>,
    config: SchedulerConfig,
) -> Result<(), SchedulerCancelled> {
    let semaphore = Arc::new(Semaphore::new(config.normalized_concurrency()));

    loop {
        if cancel.is_cancelled() {
            return Err(SchedulerCancelled);
        }

        let ready = dag.ready_nodes().await;
        if ready.is_empty() {
            if dag.is_complete().await {
                tracing::info!("scheduler run complete");
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(IDLE_SLEEP) => {}
                _ = cancel.cancelled() => return Err(SchedulerCancelled),
            }
            continue;
        }

        tracing::debug!(wave_size = ready.len(), "dispatching wave");
        let mut handles = Vec::with_capacity(ready.len());
        for id in ready {
            if dag.mark_running(&id).await.is_err() {
                // Another path (e.g. concurrent cancellation) already moved
                // this node; skip it this wave.
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => continue, // semaphore closed, only happens on drop
            };

            let dag = Arc::clone(&dag);
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            let policy = config.retry_policy;
            let id_clone = id.clone();
            let task = dag_task_for(&dag, &id).await;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_one_node(&dag, &runner, &cancel, policy, &id_clone, &task).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn dag_task_for(dag: &Dag, id: &str) -> String {
    dag.node_slice()
        .await
        .into_iter()
        .find(|n| n.id == id)
        .map(|n| n.task)
        .unwrap_or_default()
}

async fn run_one_node(
    dag: &Dag,
    runner: &Arc<dyn Runner>,
    cancel: &CancellationToken,
    policy: Option<RetryPolicy>,
    id: &str,
    task: &str,
) {
    let outcome = match policy {
        Some(policy) => {
            execute_with_retry(cancel, policy, || async {
                match runner.run_task(cancel, task).await {
                    Ok(text) => Ok(text),
                    Err(err) => {
                        let kind = classify(err.was_cancelled(), err.exit_code(), err.stderr());
                        Err((err, kind))
                    }
                }
            })
            .await
        }
        None => runner
            .run_task(cancel, task)
            .await
            .map_err(RetryError::NonRetriable),
    };

    match outcome {
        Ok(text) => {
            tracing::debug!(node = %id, "node completed");
            let _ = dag.mark_completed(id, text).await;
        }
        Err(RetryError::NonRetriable(err)) => {
            tracing::warn!(node = %id, error = %err.message, "node failed, non-retriable");
            let _ = dag.mark_failed(id, err.message).await;
        }
        Err(RetryError::Exhausted { attempts, last }) => {
            tracing::warn!(node = %id, attempts, error = %last.message, "node failed after exhausting retries");
            let _ = dag.mark_failed(id, last.message).await;
        }
        Err(RetryError::Cancelled) => {
            tracing::info!(node = %id, "node cancelled");
            let _ = dag.mark_failed(id, "cancelled".to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{NodeSpec, Status};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct AlwaysSucceeds {
        calls: AtomicUsize,
        order: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Runner for AlwaysSucceeds {
        async fn run_task(&self, _cancel: &CancellationToken, task: &str) -> Result<String, RunnerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(task.to_string());
            Ok(format!("{task}-done"))
        }
    }

    struct FailsOnTask {
        failing: String,
    }

    #[async_trait]
    impl Runner for FailsOnTask {
        async fn run_task(&self, _cancel: &CancellationToken, task: &str) -> Result<String, RunnerError> {
            if task == self.failing {
                Err(RunnerError {
                    message: format!("{task} failed"),
                    exit_code: Some(1),
                    stderr: "boom".to_string(),
                    was_cancelled: false,
                })
            } else {
                Ok(format!("{task}-done"))
            }
        }
    }

    struct FailsNTimesThenSucceeds {
        remaining: std::sync::atomic::AtomicU32,
        stderr: String,
        exit_code: i32,
    }

    #[async_trait]
    impl Runner for FailsNTimesThenSucceeds {
        async fn run_task(&self, _cancel: &CancellationToken, task: &str) -> Result<String, RunnerError> {
            let remaining = self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    Some(0)
                }
            });
            if remaining.unwrap_or(0) > 0 {
                Err(RunnerError {
                    message: "transient".to_string(),
                    exit_code: Some(self.exit_code),
                    stderr: self.stderr.clone(),
                    was_cancelled: false,
                })
            } else {
                Ok(format!("{task}-done"))
            }
        }
    }

    fn spec(id: &str, depends: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            task: format!("task-{id}"),
            depends: depends.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn diamond_graph_completes_in_dependency_order() {
        let dag = Arc::new(
            Dag::build(vec![
                spec("a", &[]),
                spec("b", &["a"]),
                spec("c", &["a"]),
                spec("d", &["b", "c"]),
            ])
            .unwrap(),
        );
        let runner = Arc::new(AlwaysSucceeds {
            calls: AtomicUsize::new(0),
            order: StdMutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();

        let result = run_to_completion(
            cancel,
            Arc::clone(&dag),
            runner.clone(),
            SchedulerConfig::default(),
        )
        .await;
        assert!(result.is_ok());

        for id in ["a", "b", "c", "d"] {
            assert_eq!(dag.status_of(id).await.unwrap(), Status::Completed);
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 4);

        let order = runner.order.lock().unwrap();
        let pos_a = order.iter().position(|t| t == "task-a").unwrap();
        let pos_d = order.iter().position(|t| t == "task-d").unwrap();
        assert!(pos_a < pos_d);
    }

    #[tokio::test]
    async fn linear_failure_cascades_through_scheduler() {
        let dag = Arc::new(
            Dag::build(vec![
                spec("a", &[]),
                spec("b", &["a"]),
                spec("c", &["a"]),
                spec("d", &["b", "c"]),
                spec("e", &[]),
            ])
            .unwrap(),
        );
        let runner = Arc::new(FailsOnTask {
            failing: "task-a".to_string(),
        });
        let cancel = CancellationToken::new();
        run_to_completion(cancel, Arc::clone(&dag), runner, SchedulerConfig::default())
            .await
            .unwrap();

        assert_eq!(dag.status_of("a").await.unwrap(), Status::Failed);
        assert_eq!(dag.status_of("b").await.unwrap(), Status::Failed);
        assert_eq!(dag.status_of("c").await.unwrap(), Status::Failed);
        assert_eq!(dag.status_of("d").await.unwrap(), Status::Failed);
        assert_eq!(dag.status_of("e").await.unwrap(), Status::Completed);
    }

    #[tokio::test]
    async fn retry_succeeds_after_two_transient_failures() {
        let dag = Arc::new(Dag::build(vec![spec("a", &[])]).unwrap());
        let runner = Arc::new(FailsNTimesThenSucceeds {
            remaining: std::sync::atomic::AtomicU32::new(2),
            stderr: "connection refused".to_string(),
            exit_code: 1,
        });
        let cancel = CancellationToken::new();
        let config = SchedulerConfig {
            max_concurrent: 4,
            retry_policy: Some(RetryPolicy {
                max_attempts: 3,
                init_delay: Duration::from_millis(1),
                multiplier: 1.0,
                max_delay: Duration::from_secs(1),
            }),
        };
        run_to_completion(cancel, Arc::clone(&dag), runner, config).await.unwrap();
        assert_eq!(dag.status_of("a").await.unwrap(), Status::Completed);
    }

    #[tokio::test]
    async fn non_retriable_failure_stops_after_one_invocation() {
        let dag = Arc::new(Dag::build(vec![spec("a", &[])]).unwrap());
        let runner = Arc::new(FailsOnTask {
            failing: "task-a".to_string(),
        });
        let cancel = CancellationToken::new();
        let config = SchedulerConfig {
            max_concurrent: 4,
            retry_policy: Some(RetryPolicy::default()),
        };
        run_to_completion(cancel, Arc::clone(&dag), runner, config).await.unwrap();
        assert_eq!(dag.status_of("a").await.unwrap(), Status::Failed);
    }

    #[tokio::test]
    async fn already_cancelled_token_returns_immediately() {
        let dag = Arc::new(Dag::build(vec![spec("a", &[])]).unwrap());
        let runner = Arc::new(AlwaysSucceeds {
            calls: AtomicUsize::new(0),
            order: StdMutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_to_completion(cancel, dag, runner, SchedulerConfig::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn after_completion_dag_is_complete() {
        let dag = Arc::new(Dag::build(vec![spec("a", &[]), spec("b", &["a"])]).unwrap());
        let runner = Arc::new(AlwaysSucceeds {
            calls: AtomicUsize::new(0),
            order: StdMutex::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        run_to_completion(cancel, Arc::clone(&dag), runner, SchedulerConfig::default())
            .await
            .unwrap();
        assert!(dag.is_complete().await);
    }

    #[tokio::test]
    async fn zero_max_concurrent_falls_back_to_four() {
        let config = SchedulerConfig {
            max_concurrent: 0,
            retry_policy: None,
        };
        assert_eq!(config.normalized_concurrency(), 4);
    }
}
