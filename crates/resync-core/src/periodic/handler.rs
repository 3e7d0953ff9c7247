//! Loop handlers: what a [`PeriodicLoop`](super::PeriodicLoop) runs each cycle.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::LoopConfig;

/// One cycle of a periodic loop.
///
/// Return `None` to keep the loop's configured interval, or `Some(delay)` to
/// choose the next delay yourself. Errors are the handler's to log; the loop
/// never sees them.
#[async_trait]
pub trait LoopHandler: Send + Sync {
    async fn tick(&self, cancel: CancellationToken) -> Option<Duration>;
}

/// Fixed-interval handler around an async closure.
pub struct FixedHandler<F> {
    f: F,
}

impl<F> FixedHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> LoopHandler for FixedHandler<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn tick(&self, cancel: CancellationToken) -> Option<Duration> {
        (self.f)(cancel).await;
        None
    }
}

/// A success/failure check driven by [`RetryHandler`].
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, cancel: CancellationToken) -> bool;
}

#[async_trait]
impl<F, Fut> Probe for F
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn probe(&self, cancel: CancellationToken) -> bool {
        (self)(cancel).await
    }
}

/// Success-gated interval with linear retry.
///
/// After a success the next run is `interval` away. After the n-th failure
/// in a row it is `retry_interval * n`, limited only by `max_delay` when one
/// is set.
pub struct RetryHandler<P> {
    probe: P,
    interval: Duration,
    retry_interval: Duration,
    max_delay: Option<Duration>,
    failures: AtomicU32,
}

impl<P> RetryHandler<P> {
    pub fn new(probe: P, interval: Duration, retry_interval: Duration) -> Self {
        Self {
            probe,
            interval,
            retry_interval,
            max_delay: None,
            failures: AtomicU32::new(0),
        }
    }

    pub fn from_config(probe: P, config: &LoopConfig) -> Self {
        let handler = Self::new(probe, config.interval, config.retry_interval);
        match config.max_retry_delay {
            Some(max) => handler.with_max_delay(max),
            None => handler,
        }
    }

    /// Stop the failure delay from growing past `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    fn record(&self, ok: bool) -> Duration {
        if ok {
            self.failures.store(0, Ordering::Relaxed);
            return self.interval;
        }
        let n = self.failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let delay = self.retry_interval.saturating_mul(n);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

#[async_trait]
impl<P: Probe> LoopHandler for RetryHandler<P> {
    async fn tick(&self, cancel: CancellationToken) -> Option<Duration> {
        let ok = self.probe.probe(cancel).await;
        Some(self.record(ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn handler() -> RetryHandler<()> {
        RetryHandler::new((), Duration::from_secs(1), Duration::from_millis(100))
    }

    #[test]
    fn failures_back_off_linearly() {
        let h = handler();
        assert_eq!(h.record(false), Duration::from_millis(100));
        assert_eq!(h.record(false), Duration::from_millis(200));
        assert_eq!(h.record(false), Duration::from_millis(300));
        assert_eq!(h.failures(), 3);
    }

    #[test]
    fn success_resets_failures() {
        let h = handler();
        h.record(false);
        h.record(false);
        assert_eq!(h.record(true), Duration::from_secs(1));
        assert_eq!(h.failures(), 0);
        assert_eq!(h.record(false), Duration::from_millis(100));
    }

    #[rstest]
    #[case::tenth(10, 1000)]
    #[case::eleventh(11, 1100)]
    #[case::twentieth(20, 2000)]
    fn failure_delay_keeps_growing_past_interval(#[case] failures: u32, #[case] expected_ms: u64) {
        let h = handler();
        let mut last = Duration::ZERO;
        for _ in 0..failures {
            last = h.record(false);
        }
        assert_eq!(last, Duration::from_millis(expected_ms));
    }

    #[rstest]
    #[case::below_cap(4, 400)]
    #[case::at_cap(5, 500)]
    #[case::past_cap(12, 500)]
    fn max_delay_caps_failure_delay(#[case] failures: u32, #[case] expected_ms: u64) {
        let h = handler().with_max_delay(Duration::from_millis(500));
        let mut last = Duration::ZERO;
        for _ in 0..failures {
            last = h.record(false);
        }
        assert_eq!(last, Duration::from_millis(expected_ms));
        assert_eq!(h.record(true), Duration::from_secs(1));
    }

    #[test]
    fn from_config_applies_optional_cap() {
        let uncapped = RetryHandler::from_config((), &LoopConfig::default());
        assert_eq!(uncapped.max_delay, None);

        let config = LoopConfig {
            interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(1),
            max_retry_delay: Some(Duration::from_secs(3)),
        };
        let capped = RetryHandler::from_config((), &config);
        for _ in 0..5 {
            capped.record(false);
        }
        assert_eq!(capped.record(false), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn tick_reports_probe_result() {
        let h = RetryHandler::new(
            |_cancel: CancellationToken| async { false },
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        let cancel = CancellationToken::new();
        assert_eq!(h.tick(cancel.clone()).await, Some(Duration::from_secs(5)));
        assert_eq!(h.tick(cancel).await, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn fixed_handler_keeps_configured_interval() {
        let h = FixedHandler::new(|_cancel: CancellationToken| async {});
        assert_eq!(h.tick(CancellationToken::new()).await, None);
    }
}
