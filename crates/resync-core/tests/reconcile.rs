//! End-to-end: periodic resync feeding a queue drained by a worker group.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use resync_core::{
    CancellationToken, DelayQueue, Kicker, LoopConfig, LoopHandler, MemberId, PeriodicLoop, Processor,
    QueueConfig, ResyncError, WorkerGroup,
};

/// Fails the first `failures` updates for every member, and fails the test
/// if two workers ever hold the same member at once.
struct Platform {
    failures: u32,
    calls: Mutex<HashMap<MemberId, u32>>,
    busy: Mutex<HashSet<MemberId>>,
    overlaps: AtomicU32,
    synced: Mutex<HashSet<MemberId>>,
}

impl Platform {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: Mutex::new(HashMap::new()),
            busy: Mutex::new(HashSet::new()),
            overlaps: AtomicU32::new(0),
            synced: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl Processor<MemberId> for Platform {
    async fn process(&self, member: MemberId) -> Result<(), ResyncError> {
        if !self.busy.lock().insert(member) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.busy.lock().remove(&member);

        let n = {
            let mut calls = self.calls.lock();
            let n = calls.entry(member).or_default();
            *n += 1;
            *n
        };
        if n <= self.failures {
            return Err(ResyncError::processing(member, "platform unavailable"));
        }
        self.synced.lock().insert(member);
        Ok(())
    }
}

fn members(n: usize) -> Arc<Vec<MemberId>> {
    Arc::new((0..n).map(|_| MemberId::generate()).collect())
}

fn resync_loop(
    members: Arc<Vec<MemberId>>,
    queue: Arc<DelayQueue<MemberId>>,
    interval: Duration,
) -> Arc<PeriodicLoop<impl LoopHandler>> {
    Arc::new(PeriodicLoop::fixed(
        "resync",
        interval,
        move |_cancel: CancellationToken| {
            let members = Arc::clone(&members);
            let queue = Arc::clone(&queue);
            async move {
                for m in members.iter() {
                    queue.add(*m);
                }
            }
        },
    ))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    while !done() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn kicked_resync_converges_despite_failures() {
    let members = members(20);
    let queue = Arc::new(DelayQueue::new(Duration::from_millis(50)));
    let platform = Arc::new(Platform::new(2));
    let cancel = CancellationToken::new();

    let group = WorkerGroup::spawn_with_cancel(
        4,
        Arc::clone(&queue),
        Arc::clone(&platform),
        cancel.child_token(),
    );
    let resync = resync_loop(Arc::clone(&members), Arc::clone(&queue), Duration::from_secs(3600));
    resync.kick();
    let runner = {
        let resync = Arc::clone(&resync);
        let token = cancel.child_token();
        tokio::spawn(async move { resync.run(token).await })
    };

    wait_until(|| platform.synced.lock().len() == members.len()).await;
    wait_until(|| queue.is_empty()).await;

    cancel.cancel();
    group.shutdown_and_join().await;
    runner.await.unwrap();

    assert_eq!(platform.overlaps.load(Ordering::SeqCst), 0);
    assert!(platform.calls.lock().values().all(|&n| n == 3));
    assert_eq!(resync.status().runs, 1);
    assert_eq!(resync.status().kicked_runs, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_resync_does_not_duplicate_pending_work() {
    let members = members(5);
    // Long backoff keeps every member parked in the queue between resyncs.
    let queue = Arc::new(DelayQueue::new(Duration::from_secs(600)));
    let platform = Arc::new(Platform::new(u32::MAX));
    let group = WorkerGroup::spawn(2, Arc::clone(&queue), Arc::clone(&platform));

    let resync = resync_loop(Arc::clone(&members), Arc::clone(&queue), Duration::from_millis(100));
    let cancel = CancellationToken::new();
    let runner = {
        let resync = Arc::clone(&resync);
        let token = cancel.clone();
        tokio::spawn(async move { resync.run(token).await })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    cancel.cancel();
    runner.await.unwrap();

    assert!(resync.status().runs >= 10);
    assert_eq!(queue.len(), members.len());
    assert_eq!(queue.stats().scheduled, members.len());
    // One failed attempt each; re-adding a backing-off key does nothing.
    for m in members.iter() {
        assert_eq!(queue.attempts(m), Some(1));
    }
    group.shutdown_and_join().await;
}

#[tokio::test(start_paused = true)]
async fn processor_can_kick_resync_through_handle() {
    /// Kicks a full resync whenever it sees a member it does not recognise.
    struct DriftDetector {
        known: HashSet<MemberId>,
        resync: Kicker,
    }

    #[async_trait]
    impl Processor<MemberId> for DriftDetector {
        async fn process(&self, member: MemberId) -> Result<(), ResyncError> {
            if !self.known.contains(&member) {
                self.resync.kick();
            }
            Ok(())
        }
    }

    let members = members(3);
    let queue = Arc::new(DelayQueue::new(Duration::from_millis(50)));
    let resync = resync_loop(Arc::clone(&members), Arc::clone(&queue), Duration::from_secs(3600));
    let detector = Arc::new(DriftDetector {
        known: members.iter().copied().collect(),
        resync: resync.kicker(),
    });
    let cancel = CancellationToken::new();
    let group =
        WorkerGroup::spawn_with_cancel(1, Arc::clone(&queue), detector, cancel.child_token());
    let runner = {
        let resync = Arc::clone(&resync);
        let token = cancel.child_token();
        tokio::spawn(async move { resync.run(token).await })
    };

    queue.add(MemberId::generate());
    wait_until(|| resync.status().runs == 1).await;
    wait_until(|| queue.is_empty()).await;

    cancel.cancel();
    group.shutdown_and_join().await;
    runner.await.unwrap();
    assert_eq!(resync.status().kicked_runs, 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_members_are_dead_lettered_from_config() {
    let config: QueueConfig = toml::from_str(
        r#"
        base_delay = "10ms"
        max_attempts = 2
        "#,
    )
    .unwrap();
    let queue = Arc::new(DelayQueue::from_config(&config));
    let platform = Arc::new(Platform::new(u32::MAX));
    let group = WorkerGroup::spawn(2, Arc::clone(&queue), Arc::clone(&platform));

    let members = members(4);
    for m in members.iter() {
        queue.add(*m);
    }
    wait_until(|| queue.stats().dead_lettered == members.len()).await;
    group.shutdown_and_join().await;

    let dead = queue.take_dead_letters();
    assert!(queue.is_empty());
    assert_eq!(
        dead.iter().map(|d| d.key).collect::<HashSet<_>>(),
        members.iter().copied().collect()
    );
    assert!(dead.iter().all(|d| d.attempts == 3));
    assert!(platform.calls.lock().values().all(|&n| n == 3));
}

#[tokio::test(start_paused = true)]
async fn retry_loop_backs_off_until_directory_recovers() {
    let outage = Arc::new(AtomicU32::new(2));
    let queue = Arc::new(DelayQueue::<MemberId>::new(Duration::from_millis(50)));
    let members = members(3);
    let config = LoopConfig {
        interval: Duration::from_secs(60),
        retry_interval: Duration::from_secs(1),
        max_retry_delay: None,
    };

    let resync = {
        let (outage, queue, members) = (Arc::clone(&outage), Arc::clone(&queue), Arc::clone(&members));
        Arc::new(PeriodicLoop::with_retry(
            "resync",
            &config,
            move |_cancel: CancellationToken| {
                let (outage, queue, members) =
                    (Arc::clone(&outage), Arc::clone(&queue), Arc::clone(&members));
                async move {
                    if outage
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok()
                    {
                        return false;
                    }
                    for m in members.iter() {
                        queue.add(*m);
                    }
                    true
                }
            },
        ))
    };
    let cancel = CancellationToken::new();
    let runner = {
        let resync = Arc::clone(&resync);
        let token = cancel.clone();
        tokio::spawn(async move { resync.run(token).await })
    };

    resync.kick();
    // Kick fails, retry after ~1s fails, retry after ~2s succeeds.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(resync.status().runs, 3);
    assert_eq!(resync.handler().failures(), 0);
    assert_eq!(queue.len(), members.len());
    assert!(
        resync
            .status()
            .next_delay
            .is_some_and(|d| d >= Duration::from_secs(54))
    );

    cancel.cancel();
    runner.await.unwrap();
}
