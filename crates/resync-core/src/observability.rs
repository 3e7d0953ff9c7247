use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time counts for one delay queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting for their backoff to elapse.
    pub scheduled: usize,
    /// Due and not yet handed to a consumer.
    pub ready: usize,
    pub in_flight: usize,
    /// Given up on by the retry policy and not yet drained.
    pub dead_lettered: usize,
    /// Given up on but evicted before being drained.
    pub dead_letters_dropped: u64,
}

impl QueueStats {
    /// Keys currently tracked by the queue (dead letters excluded).
    pub fn live(&self) -> usize {
        self.scheduled + self.ready + self.in_flight
    }
}

/// Point-in-time view of one periodic loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub name: String,
    pub runs: u64,
    /// Runs started by `kick` rather than the timer.
    pub kicked_runs: u64,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Jittered delay chosen after the last run.
    #[serde(default, with = "humantime_serde")]
    pub next_delay: Option<Duration>,
}
