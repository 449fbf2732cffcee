//! Four-state circuit breaker: `Closed -> Open -> HalfOpen -> Recovering ->
//! Closed`, with exponential cooldown capped at [`MAX_COOLDOWN`].
//!
//! All mutation happens under a single synchronous [`std::sync::Mutex`] —
//! the breaker never holds its lock across an `.await`, so it is safe to
//! call from any number of concurrent tasks.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Hard ceiling on the cooldown, regardless of how many times it doubles.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(300);

/// Consecutive successes required in `Recovering` before closing.
const RECOVERY_THRESHOLD: u32 = 4;

/// The breaker's current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// All calls pass; failures accumulate toward `failure_threshold`.
    Closed,
    /// All calls refused until the cooldown elapses.
    Open,
    /// Exactly one probe call is admitted to test recovery.
    HalfOpen,
    /// All calls admitted; `RECOVERY_THRESHOLD` consecutive successes close
    /// the breaker, any failure reopens it.
    Recovering,
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Apply spec defaults (`failure_threshold=5`, `cooldown=60s`) wherever
    /// a field is zero.
    fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: if self.failure_threshold == 0 {
                defaults.failure_threshold
            } else {
                self.failure_threshold
            },
            cooldown: if self.cooldown.is_zero() {
                defaults.cooldown
            } else {
                self.cooldown
            },
        }
    }
}

/// Point-in-time snapshot returned by [`CircuitBreaker::status`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub cooldown: Duration,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    cooldown: Duration,
    failure_threshold: u32,
}

/// A mutex-guarded circuit breaker isolating an external resource.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let config = config.normalized();
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
                probe_in_flight: false,
                cooldown: config.cooldown,
                failure_threshold: config.failure_threshold,
            }),
        }
    }

    /// Whether a call should be admitted right now.
    ///
    /// `Open` transitions to `HalfOpen` and admits exactly one probe once
    /// the cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::Recovering => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed() >= inner.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::debug!("breaker cooldown elapsed, admitting probe (half-open)");
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Recovering;
                inner.consecutive_successes = 0;
                inner.probe_in_flight = false;
            }
            BreakerState::Recovering => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= RECOVERY_THRESHOLD {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                }
            }
            BreakerState::Open => {
                // A success cannot occur while Open refuses every call;
                // tolerate it defensively by treating it as a no-op.
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= inner.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.last_failure = Some(Instant::now());
                    tracing::warn!(
                        threshold = inner.failure_threshold,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_failure = Some(Instant::now());
                inner.cooldown = (inner.cooldown * 2).min(MAX_COOLDOWN);
                inner.probe_in_flight = false;
                tracing::warn!(cooldown = ?inner.cooldown, "probe failed, breaker reopened");
            }
            BreakerState::Recovering => {
                inner.state = BreakerState::Open;
                inner.last_failure = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            BreakerState::Open => {
                // Already open; refresh the failure timestamp so the
                // cooldown window restarts from the latest observed failure.
                inner.last_failure = Some(Instant::now());
            }
        }
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        BreakerStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            cooldown: inner.cooldown,
        }
    }
}
