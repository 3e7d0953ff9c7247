//! Configuration for queues, workers and resync loops.
//!
//! Durations are written in humantime form (`"250ms"`, `"24h"`). Every field
//! has a default, so an empty document is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResyncError, Result};
use crate::queue::{DEFAULT_DEAD_LETTER_CAPACITY, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResyncConfig {
    pub queue: QueueConfig,

    /// Concurrent drive loops per queue.
    pub workers: usize,

    pub resync: LoopConfig,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            workers: 4,
            resync: LoopConfig::default(),
        }
    }
}

impl ResyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ResyncError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        self.queue.validate()?;
        self.resync.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Option<Duration>,

    pub max_attempts: Option<u32>,

    /// Re-deliver keys a consumer has held this long. Off when unset.
    #[serde(with = "humantime_serde")]
    pub lease_timeout: Option<Duration>,

    /// Granularity of the queue driver's re-evaluation.
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Undrained dead letters kept before the oldest are dropped.
    pub dead_letter_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: None,
            max_attempts: None,
            lease_timeout: None,
            tick: Duration::from_millis(100),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        non_zero("queue.base_delay", self.base_delay)?;
        non_zero("queue.tick", self.tick)?;
        if let Some(max) = self.max_delay {
            non_zero("queue.max_delay", max)?;
        }
        if let Some(lease) = self.lease_timeout {
            non_zero("queue.lease_timeout", lease)?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            max_attempts: self.max_attempts,
        }
    }
}

/// A success-gated periodic loop with linear retry on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Ceiling for the linear failure delay. Unbounded when unset.
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            retry_interval: Duration::from_secs(60),
            max_retry_delay: None,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        non_zero("resync.interval", self.interval)?;
        non_zero("resync.retry_interval", self.retry_interval)?;
        if let Some(max) = self.max_retry_delay {
            non_zero("resync.max_retry_delay", max)?;
        }
        Ok(())
    }
}

fn non_zero(field: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(ResyncError::InvalidConfig(format!("{field} must be non-zero")));
    }
    Ok(())
}
