//! Jittered periodic loop with on-demand kicks.

mod handler;

pub use handler::{FixedHandler, LoopHandler, Probe, RetryHandler};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LoopConfig;
use crate::observability::LoopStatus;

/// Apply a uniform ±10% perturbation to `delay`.
pub fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    delay.mul_f64(factor)
}

/// Cloneable handle that can only request an immediate run.
///
/// Hand this to collaborators that need to trigger a loop instead of
/// sharing the loop itself.
#[derive(Clone)]
pub struct Kicker {
    kick: Arc<Notify>,
}

impl Kicker {
    /// Request a run as soon as possible. Requests made before the loop
    /// notices the first one are coalesced.
    pub fn kick(&self) {
        // Notify keeps at most one permit, which is exactly the coalescing
        // we want.
        self.kick.notify_one();
    }
}

/// Runs a handler on a jittered interval until cancelled.
pub struct PeriodicLoop<H> {
    name: String,
    interval: Duration,
    handler: H,
    kick: Arc<Notify>,
    status: Mutex<LoopStatus>,
}

impl<F, Fut> PeriodicLoop<FixedHandler<F>>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    /// Run `f` every `interval` (±10%).
    pub fn fixed(name: impl Into<String>, interval: Duration, f: F) -> Self {
        Self::new(name, interval, FixedHandler::new(f))
    }
}

impl<P: Probe> PeriodicLoop<RetryHandler<P>> {
    /// Run `probe` every `config.interval` while it succeeds, retrying with
    /// linear backoff from `config.retry_interval` while it fails.
    pub fn with_retry(name: impl Into<String>, config: &LoopConfig, probe: P) -> Self {
        Self::new(name, config.interval, RetryHandler::from_config(probe, config))
    }
}

impl<H: LoopHandler> PeriodicLoop<H> {
    pub fn new(name: impl Into<String>, interval: Duration, handler: H) -> Self {
        let name = name.into();
        Self {
            status: Mutex::new(LoopStatus {
                name: name.clone(),
                ..LoopStatus::default()
            }),
            name,
            interval,
            handler,
            kick: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Request a run without waiting for the current interval.
    pub fn kick(&self) {
        self.kicker().kick();
    }

    pub fn kicker(&self) -> Kicker {
        Kicker {
            kick: Arc::clone(&self.kick),
        }
    }

    pub fn status(&self) -> LoopStatus {
        self.status.lock().clone()
    }

    /// Drive the handler until `cancel` fires.
    ///
    /// Each cycle waits for the (jittered) delay or a kick, runs the handler,
    /// then picks the next delay. The wait timer is created fresh after every
    /// run, so time spent in a slow handler never shortens the next wait.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(loop_name = %self.name, interval = ?self.interval, "loop started");
        let mut delay = jitter(self.interval);

        loop {
            let kicked = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => false,
                _ = self.kick.notified() => true,
            };

            self.record_start(kicked);
            debug!(loop_name = %self.name, kicked, "running handler");

            let next = self
                .handler
                .tick(cancel.clone())
                .await
                .unwrap_or(self.interval);
            delay = jitter(next);

            self.record_finish(delay);
            debug!(
                loop_name = %self.name,
                next_delay = ?delay,
                "handler finished"
            );
        }
        info!(loop_name = %self.name, "loop stopped");
    }

    fn record_start(&self, kicked: bool) {
        let mut status = self.status.lock();
        status.runs += 1;
        if kicked {
            status.kicked_runs += 1;
        }
        status.last_started_at = Some(Utc::now());
    }

    fn record_finish(&self, next_delay: Duration) {
        let mut status = self.status.lock();
        status.last_finished_at = Some(Utc::now());
        status.next_delay = Some(next_delay);
    }
}
