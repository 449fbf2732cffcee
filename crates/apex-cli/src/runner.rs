//! A concrete [`apex_core::scheduler::Runner`] that executes a node's task
//! string as a shell command.
//!
//! This is the simplest possible collaborator satisfying the scheduler's
//! contract: every external call a `Runner` makes must itself pass through
//! whatever rate limiter / circuit breaker / slot pool the caller wires up
//! for that resource class. `ShellRunner` accepts optional handles to all
//! three and consults them before spawning, so a user can apply governance
//! without the scheduler ever knowing about it.

use std::sync::Arc;

use apex_core::breaker::CircuitBreaker;
use apex_core::limiter::RateLimiterGroup;
use apex_core::pool::{Priority, SlotPool};
use apex_core::scheduler::{Runner, RunnerError};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Executes each task string via `sh -c`, optionally gated by a rate
/// limiter, a circuit breaker, and a slot pool.
pub struct ShellRunner {
    limiter: Option<(Arc<RateLimiterGroup>, String)>,
    breaker: Option<Arc<CircuitBreaker>>,
    pool: Option<(Arc<SlotPool>, Priority)>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            limiter: None,
            breaker: None,
            pool: None,
        }
    }

    pub fn with_rate_limiter(mut self, group: Arc<RateLimiterGroup>, name: impl Into<String>) -> Self {
        self.limiter = Some((group, name.into()));
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_slot_pool(mut self, pool: Arc<SlotPool>, priority: Priority) -> Self {
        self.pool = Some((pool, priority));
        self
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for ShellRunner {
    async fn run_task(&self, cancel: &CancellationToken, task: &str) -> Result<String, RunnerError> {
        if let Some((limiter, name)) = &self.limiter {
            limiter
                .wait(name, cancel)
                .await
                .map_err(|e| RunnerError::new(e.to_string()))?;
        }

        if let Some(breaker) = &self.breaker {
            if !breaker.allow() {
                return Err(RunnerError::new("circuit breaker refused call"));
            }
        }

        if let Some((pool, priority)) = &self.pool {
            pool.allocate(*priority)
                .map_err(|e| RunnerError::new(e.to_string()))?;
        }

        let result = self.run_shell(cancel, task).await;

        if let Some((pool, priority)) = &self.pool {
            pool.release(*priority);
        }

        match &result {
            Ok(_) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
            }
            Err(_) => {
                if let Some(breaker) = &self.breaker {
                    breaker.record_failure();
                }
            }
        }

        result
    }
}

impl ShellRunner {
    async fn run_shell(&self, cancel: &CancellationToken, task: &str) -> Result<String, RunnerError> {
        let mut child = Command::new("sh")
            .args(["-c", task])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RunnerError::new(format!("failed to spawn: {e}")))?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| RunnerError::new(format!("wait failed: {e}")))?;
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if output.status.success() {
                    Ok(stdout)
                } else {
                    Err(RunnerError {
                        message: format!("task exited with status {}", output.status),
                        exit_code: output.status.code(),
                        stderr,
                        was_cancelled: false,
                    })
                }
            }
            _ = cancel.cancelled() => {
                Err(RunnerError::cancelled())
            }
        }
    }
}
