//! Shared test fixtures for apex integration tests: small canned plan
//! graphs and a scriptable in-memory [`apex_core::scheduler::Runner`] that
//! never touches a real subprocess.

use std::collections::HashMap;
use std::sync::Mutex;

use apex_core::dag::{Dag, DagError, NodeSpec};
use apex_core::scheduler::{Runner, RunnerError};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Build a three-node diamond: `a` feeds `b` and `c`, both feed `d`.
pub fn diamond_plan() -> Result<Dag, DagError> {
    Dag::build(vec![
        NodeSpec {
            id: "a".to_string(),
            task: "task-a".to_string(),
            depends: vec![],
        },
        NodeSpec {
            id: "b".to_string(),
            task: "task-b".to_string(),
            depends: vec!["a".to_string()],
        },
        NodeSpec {
            id: "c".to_string(),
            task: "task-c".to_string(),
            depends: vec!["a".to_string()],
        },
        NodeSpec {
            id: "d".to_string(),
            task: "task-d".to_string(),
            depends: vec!["b".to_string(), "c".to_string()],
        },
    ])
}

/// Build a straight chain of `len` nodes, each depending on the previous one.
pub fn chain_plan(len: usize) -> Result<Dag, DagError> {
    let specs = (0..len)
        .map(|i| NodeSpec {
            id: format!("n{i}"),
            task: format!("task-{i}"),
            depends: if i == 0 {
                vec![]
            } else {
                vec![format!("n{}", i - 1)]
            },
        })
        .collect();
    Dag::build(specs)
}

/// Per-node scripted outcome for [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeed(String),
    Fail(String),
}

/// A [`Runner`] whose result per task string is fixed in advance. Tasks not
/// present in the script default to [`Outcome::Succeed`] with the task name
/// as its own result. Records every invocation for later assertion.
#[derive(Default)]
pub struct ScriptedRunner {
    script: HashMap<String, Outcome>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, task: impl Into<String>, outcome: Outcome) -> Self {
        self.script.insert(task.into(), outcome);
        self
    }

    /// Tasks invoked so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run_task(&self, _cancel: &CancellationToken, task: &str) -> Result<String, RunnerError> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(task.to_string());

        match self.script.get(task) {
            Some(Outcome::Succeed(result)) => Ok(result.clone()),
            Some(Outcome::Fail(message)) => Err(RunnerError::new(message.clone())),
            None => Ok(task.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diamond_plan_builds() {
        let dag = diamond_plan().unwrap();
        drop(dag);
    }

    #[test]
    fn chain_plan_builds_requested_length() {
        let dag = chain_plan(5).unwrap();
        drop(dag);
    }

    #[tokio::test]
    async fn scripted_runner_records_calls_and_honors_script() {
        let runner = ScriptedRunner::new().with_outcome("boom", Outcome::Fail("nope".to_string()));
        let cancel = CancellationToken::new();

        let ok = runner.run_task(&cancel, "fine").await.unwrap();
        assert_eq!(ok, "fine");

        let err = runner.run_task(&cancel, "boom").await.unwrap_err();
        assert_eq!(err.message, "nope");

        assert_eq!(runner.calls(), vec!["fine".to_string(), "boom".to_string()]);
    }
}
