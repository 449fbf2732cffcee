//! Named token-bucket rate limiters.
//!
//! Each [`Limiter`] is an independent token bucket guarded by its own
//! mutex; [`RateLimiterGroup`] is a name-keyed collection behind a
//! reader-writer lock so concurrent lookups by different names never
//! contend with each other.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Errors surfaced by [`RateLimiterGroup`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    #[error("no rate limiter registered under name {0:?}")]
    NotFound(String),
    #[error("wait on limiter {0:?} cancelled")]
    Cancelled(String),
}

/// Point-in-time snapshot of a single limiter, for `Status()`.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterSnapshot {
    pub name: String,
    pub tokens: f64,
    pub rate: f64,
    pub burst: f64,
}

/// A single token bucket: `tokens` refill continuously at `rate` tokens per
/// second, capped at `burst`. Starts full.
struct Limiter {
    tokens: f64,
    rate: f64,
    burst: f64,
    last_refill: Instant,
}

impl Limiter {
    fn new(rate: f64, burst: f64) -> Self {
        Self {
            tokens: burst,
            rate,
            burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst).max(0.0);
        self.last_refill = now;
    }

    /// Attempt to consume one token. Returns whether it was granted.
    fn allow(&mut self) -> bool {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn snapshot(&self, name: &str) -> LimiterSnapshot {
        LimiterSnapshot {
            name: name.to_string(),
            tokens: self.tokens,
            rate: self.rate,
            burst: self.burst,
        }
    }
}

/// A named collection of token-bucket rate limiters.
#[derive(Default)]
pub struct RateLimiterGroup {
    limiters: RwLock<HashMap<String, Mutex<Limiter>>>,
}

impl RateLimiterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named limiter. The bucket starts full.
    pub async fn add(&self, name: impl Into<String>, rate: f64, burst: f64) {
        let name = name.into();
        let mut map = self.limiters.write().await;
        map.insert(name, Mutex::new(Limiter::new(rate, burst)));
    }

    /// Remove a named limiter. No-op if it does not exist.
    pub async fn remove(&self, name: &str) {
        let mut map = self.limiters.write().await;
        map.remove(name);
    }

    /// Non-blocking admission check: refill, then try to consume a token.
    pub async fn allow(&self, name: &str) -> Result<bool, LimiterError> {
        let map = self.limiters.read().await;
        let limiter = map
            .get(name)
            .ok_or_else(|| LimiterError::NotFound(name.to_string()))?;
        let mut guard = limiter.lock().await;
        Ok(guard.allow())
    }

    /// Block (politely) until a token is available or `cancel` fires.
    ///
    /// Polls `allow` and sleeps `min(1/rate, 100ms)` between attempts.
    pub async fn wait(&self, name: &str, cancel: &CancellationToken) -> Result<(), LimiterError> {
        loop {
            if self.allow(name).await? {
                return Ok(());
            }

            let poll_delay = {
                let map = self.limiters.read().await;
                let limiter = map
                    .get(name)
                    .ok_or_else(|| LimiterError::NotFound(name.to_string()))?;
                let guard = limiter.lock().await;
                let per_token = if guard.rate > 0.0 {
                    Duration::from_secs_f64(1.0 / guard.rate)
                } else {
                    Duration::from_millis(100)
                };
                per_token.min(Duration::from_millis(100))
            };

            tokio::select! {
                _ = tokio::time::sleep(poll_delay) => {}
                _ = cancel.cancelled() => return Err(LimiterError::Cancelled(name.to_string())),
            }
        }
    }

    /// Snapshot every registered limiter's current state.
    pub async fn status(&self) -> Vec<LimiterSnapshot> {
        let map = self.limiters.read().await;
        let mut out = Vec::with_capacity(map.len());
        for (name, limiter) in map.iter() {
            let guard = limiter.lock().await;
            out.push(guard.snapshot(name));
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_full_and_allows_burst() {
        let group = RateLimiterGroup::new();
        group.add("llm-calls", 1.0, 3.0).await;
        assert!(group.allow("llm-calls").await.unwrap());
        assert!(group.allow("llm-calls").await.unwrap());
        assert!(group.allow("llm-calls").await.unwrap());
        assert!(!group.allow("llm-calls").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_name_errors() {
        let group = RateLimiterGroup::new();
        assert_eq!(
            group.allow("missing").await.unwrap_err(),
            LimiterError::NotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn refill_over_time_grants_more_tokens() {
        let group = RateLimiterGroup::new();
        group.add("slow", 100.0, 1.0).await;
        assert!(group.allow("slow").await.unwrap());
        assert!(!group.allow("slow").await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(group.allow("slow").await.unwrap());
    }

    #[tokio::test]
    async fn tokens_never_exceed_burst() {
        let group = RateLimiterGroup::new();
        group.add("capped", 1000.0, 2.0).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = group.status().await;
        assert_eq!(status[0].tokens.min(2.0), status[0].tokens);
        assert!(status[0].tokens <= 2.0);
    }

    #[tokio::test]
    async fn wait_succeeds_once_token_refills() {
        let group = RateLimiterGroup::new();
        group.add("wait-me", 50.0, 1.0).await;
        assert!(group.allow("wait-me").await.unwrap());
        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(Duration::from_secs(1), group.wait("wait-me", &cancel))
            .await
            .expect("wait should not hang");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_respects_cancellation() {
        let group = RateLimiterGroup::new();
        group.add("never", 0.0001, 1.0).await;
        assert!(group.allow("never").await.unwrap());
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });
        let result = group.wait("never", &cancel).await;
        assert!(matches!(result, Err(LimiterError::Cancelled(_))));
    }

    #[tokio::test]
    async fn remove_then_allow_errors() {
        let group = RateLimiterGroup::new();
        group.add("temp", 1.0, 1.0).await;
        group.remove("temp").await;
        assert!(group.allow("temp").await.is_err());
    }

    #[tokio::test]
    async fn status_is_sorted_by_name() {
        let group = RateLimiterGroup::new();
        group.add("zeta", 1.0, 1.0).await;
        group.add("alpha", 1.0, 1.0).await;
        let names: Vec<String> = group.status().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
