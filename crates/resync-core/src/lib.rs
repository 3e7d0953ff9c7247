//! resync-core
//!
//! Building blocks for reconciling an external system with a system of record.
//!
//! - **queue**: keyed delay queue with exponential backoff and jitter
//! - **worker**: drive loops that take keys from a queue and process them
//! - **periodic**: jittered periodic loops with kicks and success-gated retry
//! - **config**: serde-backed configuration for all of the above
//! - **observability**: serializable status snapshots
//! - **ids**: ULID-backed typed identifiers

pub mod config;
pub mod error;
pub mod ids;
pub mod observability;
pub mod periodic;
pub mod queue;
pub mod worker;

pub use config::{LoopConfig, QueueConfig, ResyncConfig};
pub use error::{ResyncError, Result};
pub use ids::{Id, IdMarker, MemberId};
pub use observability::{LoopStatus, QueueStats};
pub use periodic::{FixedHandler, Kicker, LoopHandler, PeriodicLoop, Probe, RetryHandler, jitter};
pub use queue::{DeadLetter, DelayQueue, ItemState, RetryOutcome, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
pub use worker::{Processor, WorkerGroup, run_worker};
