//! resync - reconciles a simulated chat platform against a simulated directory.
//!
//! A periodic resync loop reads the directory and enqueues every member; a
//! worker group drains the queue, retrying members the platform rejects.

mod simulation;
mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use resync_core::{CancellationToken, DelayQueue, MemberId, PeriodicLoop, ResyncConfig, WorkerGroup};
use tracing::{info, warn};

use crate::simulation::{ChatPlatform, Directory};

#[derive(Parser, Debug)]
#[command(name = "resync")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "RESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Override `workers`.
    #[arg(long, env = "RESYNC_WORKERS")]
    workers: Option<usize>,

    /// Override `queue.max_attempts`.
    #[arg(long, env = "RESYNC_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Stop after this many seconds. Runs until Ctrl-C otherwise.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Members in the simulated directory.
    #[arg(long, default_value_t = 100)]
    members: usize,

    /// Probability that one platform update fails.
    #[arg(long, default_value_t = 0.2)]
    failure_rate: f64,

    /// Probability that one directory read fails.
    #[arg(long, default_value_t = 0.1)]
    outage_rate: f64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RESYNC_JSON_LOGS")]
    json_logs: bool,
}

fn load_config(path: Option<&Path>) -> Result<ResyncConfig> {
    let Some(path) = path else {
        return Ok(ResyncConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Log and forget the members the queue gave up on since the last call.
fn drain_dead_letters(queue: &DelayQueue<MemberId>) -> usize {
    let dead = queue.take_dead_letters();
    for letter in &dead {
        warn!(member = %letter.key, attempts = letter.attempts, "member abandoned until next resync");
    }
    dead.len()
}

fn probability(name: &str, value: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        bail!("--{name} must be within 0.0..=1.0, got {value}");
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init(args.json_logs);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.queue.max_attempts = Some(max_attempts);
    }
    config.validate()?;

    let directory = Arc::new(Directory::generate(
        args.members,
        probability("outage-rate", args.outage_rate)?,
    ));
    let platform = Arc::new(ChatPlatform::new(probability(
        "failure-rate",
        args.failure_rate,
    )?));
    let queue = Arc::new(DelayQueue::<MemberId>::from_config(&config.queue));

    let cancel = CancellationToken::new();
    let group = WorkerGroup::spawn_with_cancel(
        config.workers,
        Arc::clone(&queue),
        Arc::clone(&platform),
        cancel.child_token(),
    );

    let abandoned = Arc::new(AtomicUsize::new(0));
    let resync = {
        let directory = Arc::clone(&directory);
        let queue = Arc::clone(&queue);
        let abandoned = Arc::clone(&abandoned);
        Arc::new(PeriodicLoop::with_retry(
            "resync",
            &config.resync,
            move |_cancel: CancellationToken| {
                let directory = Arc::clone(&directory);
                let queue = Arc::clone(&queue);
                let abandoned = Arc::clone(&abandoned);
                async move {
                    // Give-ups since the last cycle; this run re-adds them.
                    abandoned.fetch_add(drain_dead_letters(&queue), Ordering::Relaxed);
                    match directory.fetch().await {
                        Ok(members) => {
                            let added = members.into_iter().filter(|m| queue.add(*m)).count();
                            info!(added, queued = queue.len(), "resync enqueued members");
                            true
                        }
                        Err(err) => {
                            warn!(error = %err, "resync could not read directory");
                            false
                        }
                    }
                }
            },
        ))
    };
    // Reconcile once at startup instead of waiting a full interval.
    resync.kick();
    let resync_task = {
        let resync = Arc::clone(&resync);
        let token = cancel.child_token();
        tokio::spawn(async move { resync.run(token).await })
    };

    info!(
        members = directory.len(),
        workers = config.workers,
        loop_name = resync.name(),
        interval = ?resync.interval(),
        "resync service running"
    );
    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                res = tokio::signal::ctrl_c() => res.context("waiting for ctrl-c")?,
            }
        }
        None => tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?,
    }

    info!("shutting down");
    cancel.cancel();
    group.shutdown_and_join().await;
    resync_task.await.context("resync loop panicked")?;

    let stats = queue.stats();
    abandoned.fetch_add(drain_dead_letters(&queue), Ordering::Relaxed);
    let summary = serde_json::json!({
        "members": directory.len(),
        "synced": platform.synced(),
        "abandoned": abandoned.load(Ordering::Relaxed),
        "queue": stats,
        "resync": resync.status(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
