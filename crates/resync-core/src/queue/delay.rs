//! In-memory delay queue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Bound;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::item::{QueueItem, Slot};
use super::{ItemState, RetryPolicy};
use crate::config::QueueConfig;
use crate::observability::QueueStats;

const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Dead letters retained until drained; older ones are dropped first.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1024;

/// What `retry` did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Re-indexed; eligible again after `delay`.
    Scheduled { attempts: u32, delay: Duration },

    /// The policy's `max_attempts` was exceeded; the key was removed and
    /// recorded as a dead letter.
    GaveUp { attempts: u32 },

    /// No such key (already `done`, or never added).
    Missing,
}

/// A key the retry policy gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter<K> {
    pub key: K,
    pub attempts: u32,
}

/// Queue state behind the lock.
struct QueueState<K> {
    /// Membership authority: at most one item per key.
    items: HashMap<K, QueueItem<K>>,

    /// Due-time index over the Pending items of `items`.
    schedule: BTreeMap<Slot, K>,

    /// Most recent give-ups, oldest first, at most `dead_capacity` long.
    dead: VecDeque<DeadLetter<K>>,
    dead_capacity: usize,
    /// Give-ups evicted from `dead` before anyone drained them.
    dead_dropped: u64,

    next_seq: u64,
}

impl<K: Eq + Hash + Clone> QueueState<K> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            schedule: BTreeMap::new(),
            dead: VecDeque::new(),
            dead_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            dead_dropped: 0,
            next_seq: 0,
        }
    }

    fn push_dead(&mut self, letter: DeadLetter<K>) {
        if self.dead_capacity == 0 {
            self.dead_dropped += 1;
            return;
        }
        if self.dead.len() >= self.dead_capacity {
            self.dead.pop_front();
            self.dead_dropped += 1;
        }
        self.dead.push_back(letter);
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Insert `key` due at `now` unless it is already tracked.
    fn insert(&mut self, key: &K, now: Instant) -> bool {
        if self.items.contains_key(key) {
            return false;
        }
        let seq = self.allocate_seq();
        let item = QueueItem::new(key.clone(), now, seq);
        self.schedule.insert(item.slot(), key.clone());
        self.items.insert(key.clone(), item);
        true
    }

    /// Remove `key` from both the map and the index.
    fn remove(&mut self, key: &K) -> Option<QueueItem<K>> {
        let item = self.items.remove(key)?;
        if item.state == ItemState::Pending {
            self.schedule.remove(&item.slot());
        }
        Some(item)
    }

    /// Take the earliest due item, if any, and mark it in flight.
    fn pop_due(&mut self, now: Instant) -> Option<K> {
        let (&slot, _) = self.schedule.first_key_value()?;
        if slot.0 > now {
            return None;
        }
        let (_, key) = self.schedule.pop_first()?;
        match self.items.get_mut(&key) {
            Some(item) => {
                item.take(now);
                Some(key)
            }
            None => {
                // The index only ever points at live items.
                error!("due-time index referenced an unknown key");
                None
            }
        }
    }

    /// Re-index `key` at `at` with the given attempt count.
    fn reschedule(&mut self, key: &K, at: Instant, attempts: u32) {
        let seq = self.allocate_seq();
        if let Some(item) = self.items.get_mut(key) {
            if item.state == ItemState::Pending {
                self.schedule.remove(&item.slot());
            }
            item.attempts = attempts;
            item.reschedule(at, seq);
            self.schedule.insert(item.slot(), key.clone());
        }
    }

    /// Return in-flight items held longer than `lease` to the ready set.
    fn reap_expired(&mut self, now: Instant, lease: Duration) -> Vec<K> {
        let expired: Vec<K> = self
            .items
            .values()
            .filter(|item| {
                item.dequeued_at
                    .is_some_and(|taken| now.saturating_duration_since(taken) >= lease)
            })
            .map(|item| item.key.clone())
            .collect();

        for key in &expired {
            let attempts = self.items.get(key).map_or(0, |item| item.attempts);
            self.reschedule(key, now, attempts);
        }
        expired
    }

    fn has_due(&self, now: Instant) -> bool {
        self.schedule
            .first_key_value()
            .is_some_and(|(slot, _)| slot.0 <= now)
    }

    /// Earliest due-time strictly after `now`.
    fn next_future_due(&self, now: Instant) -> Option<Instant> {
        self.schedule
            .range((Bound::Excluded((now, u64::MAX)), Bound::Unbounded))
            .next()
            .map(|(slot, _)| slot.0)
    }

    fn stats(&self, now: Instant) -> QueueStats {
        let mut stats = QueueStats {
            dead_lettered: self.dead.len(),
            dead_letters_dropped: self.dead_dropped,
            ..QueueStats::default()
        };
        for item in self.items.values() {
            if item.state.is_in_flight() {
                stats.in_flight += 1;
            } else if item.is_due(now) {
                stats.ready += 1;
            } else {
                stats.scheduled += 1;
            }
        }
        stats
    }
}

/// Deduplicating set of keys with due-times and blocking, due-ordered `get`.
///
/// Design:
/// - One lock guards the key map and the due-time index; it is never held
///   across an `.await`.
/// - `add`, `done` and `retry` are synchronous and never block.
/// - Consumers park in `get` until notified. The [`run`](Self::run) driver
///   owns the clock and wakes them when scheduled items come due, so a queue
///   whose items are ever retried must have `run` spawned.
pub struct DelayQueue<K> {
    state: Mutex<QueueState<K>>,
    policy: RetryPolicy,
    /// Wakes consumers parked in `get`.
    ready: Notify,
    /// Wakes the driver when the earliest future due-time may have changed.
    rescheduled: Notify,
    tick: Duration,
    lease_timeout: Option<Duration>,
}

impl<K> DelayQueue<K>
where
    K: Eq + Hash + Clone + Debug + Send,
{
    /// Unbounded exponential retry from `base_delay`.
    pub fn new(base_delay: Duration) -> Self {
        Self::with_policy(RetryPolicy::new(base_delay))
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            policy,
            ready: Notify::new(),
            rescheduled: Notify::new(),
            tick: DEFAULT_TICK,
            lease_timeout: None,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        let mut queue = Self::with_policy(config.retry_policy());
        queue.tick = config.tick;
        queue.lease_timeout = config.lease_timeout;
        queue.with_dead_letter_capacity(config.dead_letter_capacity)
    }

    /// Keep at most `capacity` undrained dead letters. Once full, each new
    /// give-up evicts the oldest and bumps `QueueStats::dead_letters_dropped`.
    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        let state = self.state.get_mut();
        state.dead_capacity = capacity;
        while state.dead.len() > capacity {
            state.dead.pop_front();
            state.dead_dropped += 1;
        }
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Re-deliver keys a consumer has held for `lease_timeout` without
    /// calling `done` or `retry`.
    pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
        self.lease_timeout = Some(lease_timeout);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Enqueue `key` for immediate processing unless it is already tracked.
    ///
    /// Returns whether a new item was created. An existing item (pending,
    /// backing off, or in flight) keeps its attempts and schedule.
    pub fn add(&self, key: K) -> bool {
        let inserted = self.state.lock().insert(&key, Instant::now());
        if inserted {
            trace!(key = ?key, "added");
            self.ready.notify_one();
        }
        inserted
    }

    /// Forget `key`. No-op if absent.
    pub fn done(&self, key: &K) -> bool {
        let removed = self.state.lock().remove(key);
        match removed {
            Some(item) => {
                trace!(key = ?key, attempts = item.attempts, "done");
                true
            }
            None => false,
        }
    }

    /// Reschedule `key` with exponential backoff, or give up per policy.
    ///
    /// Works on whatever item currently exists for the key, in flight or not,
    /// so it is safe to race with `done`.
    pub fn retry(&self, key: &K) -> RetryOutcome {
        let now = Instant::now();
        let outcome = {
            let mut state = self.state.lock();
            let Some(item) = state.items.get(key) else {
                return RetryOutcome::Missing;
            };
            let attempts = item.attempts.saturating_add(1);

            if self.policy.exhausted(attempts) {
                state.remove(key);
                state.push_dead(DeadLetter {
                    key: key.clone(),
                    attempts,
                });
                RetryOutcome::GaveUp { attempts }
            } else {
                let delay = self.policy.backoff(attempts);
                state.reschedule(key, now + delay, attempts);
                RetryOutcome::Scheduled { attempts, delay }
            }
        }; // Lock released here

        match outcome {
            RetryOutcome::Scheduled { attempts, delay } => {
                debug!(
                    key = ?key,
                    attempts,
                    delay = ?delay,
                    "retry scheduled"
                );
                self.rescheduled.notify_one();
            }
            RetryOutcome::GaveUp { attempts } => {
                warn!(key = ?key, attempts, "retry limit reached, dead-lettering");
            }
            RetryOutcome::Missing => {}
        }
        outcome
    }

    /// Wait for the earliest due key and hand it to this caller only.
    ///
    /// The key stays tracked (in flight) until `done` or `retry`. Cancel
    /// safe: dropping the future never loses or duplicates a key.
    pub async fn get(&self) -> K {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a wake-up between the check and the
            // await is not lost.
            notified.as_mut().enable();

            if let Some(key) = self.try_get() {
                return key;
            }
            notified.await;
        }
    }

    /// Non-blocking `get`.
    pub fn try_get(&self) -> Option<K> {
        let key = self.state.lock().pop_due(Instant::now())?;
        trace!(key = ?key, "dequeued");
        Some(key)
    }

    /// Drive wake-ups until `cancel` fires.
    ///
    /// Sleeps until the earliest future due-time (at most `tick`), wakes
    /// parked consumers when anything is due, and reclaims expired leases
    /// when a lease timeout is configured.
    pub async fn run(&self, cancel: CancellationToken) {
        debug!(tick = ?self.tick, "delay queue driver started");
        loop {
            let now = Instant::now();
            let (due, wake_at) = {
                let mut state = self.state.lock();
                if let Some(lease) = self.lease_timeout {
                    let reaped = state.reap_expired(now, lease);
                    if !reaped.is_empty() {
                        warn!(
                            count = reaped.len(),
                            keys = ?reaped,
                            "lease expired, redelivering"
                        );
                    }
                }
                let next = state.next_future_due(now);
                let horizon = now + self.tick;
                (
                    state.has_due(now),
                    next.map_or(horizon, |at| at.min(horizon)),
                )
            };

            if due {
                self.ready.notify_waiters();
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(wake_at) => {},
                _ = self.rescheduled.notified() => {},
            }
        }
        debug!("delay queue driver stopped");
    }

    /// Attempt count of a tracked key.
    pub fn attempts(&self, key: &K) -> Option<u32> {
        self.state.lock().items.get(key).map(|item| item.attempts)
    }

    /// Snapshot of the tracked item for `key`.
    pub fn item(&self, key: &K) -> Option<QueueItem<K>> {
        self.state.lock().items.get(key).cloned()
    }

    pub fn state_of(&self, key: &K) -> Option<ItemState> {
        self.state.lock().items.get(key).map(|item| item.state)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().items.contains_key(key)
    }

    /// Tracked keys, in flight included.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().stats(Instant::now())
    }

    /// Drain the keys the retry policy gave up on.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter<K>> {
        self.state.lock().dead.drain(..).collect()
    }

    /// Reclaim keys held in flight for at least `lease_timeout`.
    ///
    /// Their attempt counts are kept. Returns how many were reclaimed.
    pub fn reap_expired(&self, lease_timeout: Duration) -> usize {
        let reaped = self.state.lock().reap_expired(Instant::now(), lease_timeout);
        if !reaped.is_empty() {
            self.ready.notify_waiters();
        }
        reaped.len()
    }
}
