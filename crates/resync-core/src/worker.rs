use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ResyncError;
use crate::queue::{DelayQueue, RetryOutcome};

/// Processes one dequeued key.
///
/// `Ok` marks the key done; `Err` asks the queue to retry it with backoff.
/// Interpreting errors (transient vs permanent) is the processor's business:
/// return `Ok` for failures that should not be retried.
#[async_trait]
pub trait Processor<K>: Send + Sync {
    async fn process(&self, key: K) -> Result<(), ResyncError>;
}

#[async_trait]
impl<K, F, Fut> Processor<K> for F
where
    K: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ResyncError>> + Send + 'static,
{
    async fn process(&self, key: K) -> Result<(), ResyncError> {
        (self)(key).await
    }
}

/// Drive one worker until `cancel` fires: get, process, done-or-retry.
///
/// A failing key never stalls the loop; it is rescheduled and the next due
/// key is taken. Cancellation is only observed while waiting for a key, an
/// in-progress `process` call runs to completion.
pub async fn run_worker<K, P>(
    worker_id: usize,
    queue: Arc<DelayQueue<K>>,
    processor: Arc<P>,
    cancel: CancellationToken,
) where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: Processor<K> + ?Sized,
{
    debug!(worker = worker_id, "worker started");
    loop {
        let key = tokio::select! {
            _ = cancel.cancelled() => break,
            key = queue.get() => key,
        };

        match processor.process(key.clone()).await {
            Ok(()) => {
                queue.done(&key);
                debug!(worker = worker_id, key = ?key, "processed");
            }
            Err(err) => match queue.retry(&key) {
                RetryOutcome::Scheduled { attempts, delay } => warn!(
                    worker = worker_id,
                    key = ?key,
                    attempts,
                    delay = ?delay,
                    error = %err,
                    "processing failed, retrying"
                ),
                RetryOutcome::GaveUp { attempts } => error!(
                    worker = worker_id,
                    key = ?key,
                    attempts,
                    error = %err,
                    "processing failed, giving up"
                ),
                RetryOutcome::Missing => debug!(
                    worker = worker_id,
                    key = ?key,
                    error = %err,
                    "processing failed for a key that was already removed"
                ),
            },
        }
    }
    debug!(worker = worker_id, "worker stopped");
}

/// Worker group handle.
/// - `n` drive loops plus the queue's driver share one cancellation token.
/// - `join` waits for all of them.
pub struct WorkerGroup {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers and the queue driver.
    pub fn spawn<K, P>(n: usize, queue: Arc<DelayQueue<K>>, processor: Arc<P>) -> Self
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        P: Processor<K> + ?Sized + 'static,
    {
        Self::spawn_with_cancel(n, queue, processor, CancellationToken::new())
    }

    /// Like [`spawn`](Self::spawn), stopping when `cancel` (or a parent of it) fires.
    pub fn spawn_with_cancel<K, P>(
        n: usize,
        queue: Arc<DelayQueue<K>>,
        processor: Arc<P>,
        cancel: CancellationToken,
    ) -> Self
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        P: Processor<K> + ?Sized + 'static,
    {
        let mut joins = Vec::with_capacity(n + 1);

        let driver_queue = Arc::clone(&queue);
        let driver_cancel = cancel.clone();
        joins.push(tokio::spawn(async move {
            driver_queue.run(driver_cancel).await;
        }));

        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let p = Arc::clone(&processor);
            let c = cancel.clone();
            joins.push(tokio::spawn(run_worker(worker_id, q, p, c)));
        }

        info!(workers = n, "worker group started");
        Self { cancel, joins }
    }

    /// Stop taking new keys. In-flight `process` calls are not interrupted.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every task without requesting shutdown.
    pub async fn join(self) {
        for j in self.joins {
            if let Err(e) = j.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
        info!("worker group stopped");
    }
}
