//! Governance configuration: the typed, TOML-backed values consumed by the
//! core (§6 Configuration surface). Resolution of *where* the values come
//! from (CLI flag, env var, on-disk file) is the CLI's concern; this module
//! only owns validated defaults and deserialization.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::BreakerConfig;
use crate::pool::Priority;
use crate::retry::RetryPolicy;
use crate::scheduler::SchedulerConfig;

/// Errors validating a [`GovernanceConfig`] loaded from disk.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool.max_concurrent must be between 1 and 64, got {0}")]
    MaxConcurrentOutOfRange(i64),
    #[error("retry.max_attempts must be between 1 and 20, got {0}")]
    MaxAttemptsOutOfRange(u32),
    #[error("retry.multiplier must be between 1.0 and 10.0, got {0}")]
    MultiplierOutOfRange(f64),
    #[error("circuit_breaker.failure_threshold must be > 0, got {0}")]
    FailureThresholdMustBePositive(u32),
    #[error("circuit_breaker.cooldown_seconds must be > 0, got {0}")]
    CooldownMustBePositive(u64),
    #[error("rate_limit group {0:?} has non-positive rate or burst")]
    InvalidRateLimit(String),
}

/// On-disk representation of a rate limiter group entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitToml {
    pub name: String,
    pub rate: f64,
    pub burst: f64,
}

/// On-disk representation of a slot reservation entry. `priority` is one of
/// `urgent`, `high`, `normal`, `low`; anything else is accepted but treated
/// as [`Priority::Other`] with rank 99.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotReservationToml {
    pub priority: String,
    pub reserved: usize,
}

/// Full governance configuration surface, as loaded from `apex.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: i64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_init_delay_seconds")]
    pub init_delay_seconds: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    #[serde(default)]
    pub rate_limits: Vec<RateLimitToml>,
    #[serde(default)]
    pub slot_reservations: Vec<SlotReservationToml>,
}

fn default_max_concurrent() -> i64 {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_init_delay_seconds() -> u64 {
    2
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_seconds() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_seconds() -> u64 {
    60
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            init_delay_seconds: default_init_delay_seconds(),
            multiplier: default_multiplier(),
            max_delay_seconds: default_max_delay_seconds(),
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            rate_limits: Vec::new(),
            slot_reservations: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.max_concurrent) {
            return Err(ConfigError::MaxConcurrentOutOfRange(self.max_concurrent));
        }
        if !(1..=20).contains(&self.max_attempts) {
            return Err(ConfigError::MaxAttemptsOutOfRange(self.max_attempts));
        }
        if !(1.0..=10.0).contains(&self.multiplier) {
            return Err(ConfigError::MultiplierOutOfRange(self.multiplier));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::FailureThresholdMustBePositive(self.failure_threshold));
        }
        if self.cooldown_seconds == 0 {
            return Err(ConfigError::CooldownMustBePositive(self.cooldown_seconds));
        }
        for group in &self.rate_limits {
            if group.rate <= 0.0 || group.burst <= 0.0 {
                return Err(ConfigError::InvalidRateLimit(group.name.clone()));
            }
        }
        Ok(())
    }

    pub fn parse_toml(content: &str) -> Result<Self, ConfigParseError> {
        let config: GovernanceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            init_delay: Duration::from_secs(self.init_delay_seconds),
            multiplier: self.multiplier,
            max_delay: Duration::from_secs(self.max_delay_seconds),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_seconds),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.max_concurrent,
            retry_policy: Some(self.retry_policy()),
        }
    }
}

/// Map a `priority` TOML string to a [`Priority`].
pub fn parse_priority(name: &str) -> Priority {
    match name.to_ascii_lowercase().as_str() {
        "urgent" => Priority::Urgent,
        "high" => Priority::High,
        "normal" => Priority::Normal,
        "low" => Priority::Low,
        _ => Priority::Other(99),
    }
}

/// Errors parsing and validating `apex.toml` in one step.
#[derive(Debug, Error)]
pub enum ConfigParseError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}
