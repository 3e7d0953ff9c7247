//! Queue item: key + schedule + attempt counter.

use tokio::time::Instant;

use super::ItemState;

/// Position of an item in the due-time index.
///
/// `seq` is unique per queue, so two items due at the same instant still get
/// distinct slots; ties are otherwise unordered.
pub(crate) type Slot = (Instant, u64);

/// One pending unit of work.
///
/// Design:
/// - Owned exclusively by the queue's key map (the membership authority).
/// - The due-time index holds a copy of `slot` only, never the item.
/// - Callers pass keys; [`DelayQueue::item`](super::DelayQueue::item) returns a snapshot.
#[derive(Debug, Clone)]
pub struct QueueItem<K> {
    pub key: K,

    /// Retries since insertion; starts at 0.
    pub attempts: u32,

    /// The item may be handed out at or after this instant.
    pub next_retry: Instant,

    pub state: ItemState,

    /// When the current consumer took it (InFlight only).
    pub dequeued_at: Option<Instant>,

    pub(crate) seq: u64,
}

impl<K> QueueItem<K> {
    pub(crate) fn new(key: K, now: Instant, seq: u64) -> Self {
        Self {
            key,
            attempts: 0,
            next_retry: now,
            state: ItemState::Pending,
            dequeued_at: None,
            seq,
        }
    }

    pub(crate) fn slot(&self) -> Slot {
        (self.next_retry, self.seq)
    }

    /// Hand the item to a consumer.
    pub(crate) fn take(&mut self, now: Instant) {
        self.state = ItemState::InFlight;
        self.dequeued_at = Some(now);
    }

    /// Put the item back in the index under a new slot.
    pub(crate) fn reschedule(&mut self, next_retry: Instant, seq: u64) {
        self.state = ItemState::Pending;
        self.next_retry = next_retry;
        self.dequeued_at = None;
        self.seq = seq;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.state == ItemState::Pending && self.next_retry <= now
    }
}
