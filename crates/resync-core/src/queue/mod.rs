//! Queue module: item state, retry policy, and the in-memory delay queue.

mod delay;
mod item;
mod retry;
mod state;

pub use delay::{DEFAULT_DEAD_LETTER_CAPACITY, DeadLetter, DelayQueue, RetryOutcome};
pub use item::QueueItem;
pub use retry::RetryPolicy;
pub use state::ItemState;
