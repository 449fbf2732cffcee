//! Core task-execution substrate for agent orchestration: retry, rate
//! limiting, circuit breaking, priority slots, eventing, a dependency
//! graph, and a bounded worker pool/scheduler.
//!
//! This crate is pure in-memory — it has no database, no TUI, and no
//! opinion about what a task actually runs. Callers inject a [`scheduler::Runner`]
//! to bridge into an external process (an LLM agent harness, a shell
//! command, a test double) and drive a [`dag::Dag`] to completion with
//! [`scheduler::run_to_completion`].

pub mod breaker;
pub mod config;
pub mod dag;
pub mod events;
pub mod limiter;
pub mod planfile;
pub mod pool;
pub mod retry;
pub mod scheduler;
pub mod telemetry;
