//! Retry policy: decides backoff delays and when to give up.

use std::time::Duration;

use rand::Rng;

/// Upper bound on any computed delay, so `Instant + delay` can never overflow.
const DELAY_CEILING: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Maximum jitter, as a fraction of the exponential delay.
const JITTER_FRACTION: f64 = 0.05;

/// Retry policy for failed keys.
///
/// `backoff(attempts) = base_delay * 2^attempts + jitter`, where jitter is
/// uniform in `[0, 5%]` of the doubled delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay unit the exponential grows from.
    pub base_delay: Duration,

    /// Optional cap applied before jitter.
    pub max_delay: Option<Duration>,

    /// Give up once a retry would push `attempts` past this. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Unbounded exponential retry from `base_delay`.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: None,
            max_attempts: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Delay before jitter: `base_delay * 2^attempts`, capped.
    pub fn exponential_delay(&self, attempts: u32) -> Duration {
        let doubled = 2u32
            .checked_pow(attempts)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(DELAY_CEILING);

        let capped = match self.max_delay {
            Some(max) => doubled.min(max),
            None => doubled,
        };
        capped.min(DELAY_CEILING)
    }

    /// Full backoff for the given attempt count, jitter included.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let delay = self.exponential_delay(attempts);
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        delay + delay.mul_f64(jitter)
    }

    /// Would `attempts` (already incremented) exceed the policy?
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts > max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
