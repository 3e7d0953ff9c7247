//! Per-key state machine for the delay queue.

use serde::{Deserialize, Serialize};

/// Item state.
///
/// State transitions:
/// - (absent) -> Pending            [add]
/// - Pending  -> InFlight           [get, once due]
/// - InFlight -> (absent)           [done]
/// - InFlight -> Pending            [retry, with a future due-time]
/// - InFlight -> Pending            [lease reaper, when enabled]
///
/// `Pending` covers both "due" and "waiting for backoff"; which one is
/// decided by comparing `next_retry` with the clock, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    /// Indexed by due-time and eligible for `get` once due.
    Pending,

    /// Handed to a consumer; not indexed until `retry` or the reaper.
    InFlight,
}

impl ItemState {
    pub fn is_in_flight(self) -> bool {
        matches!(self, ItemState::InFlight)
    }
}
