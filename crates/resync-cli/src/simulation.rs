//! In-process stand-ins for the two systems being reconciled.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use resync_core::{MemberId, Processor, ResyncError};
use tracing::debug;

/// Authoritative member list. Reads fail at `outage_rate`.
pub struct Directory {
    members: Vec<MemberId>,
    outage_rate: f64,
}

impl Directory {
    pub fn generate(count: usize, outage_rate: f64) -> Self {
        Self {
            members: (0..count).map(|_| MemberId::generate()).collect(),
            outage_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub async fn fetch(&self) -> Result<Vec<MemberId>, ResyncError> {
        let down = rand::thread_rng().gen_bool(self.outage_rate);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if down {
            return Err(ResyncError::Other("directory unavailable".to_string()));
        }
        Ok(self.members.clone())
    }
}

/// External chat platform that must mirror the directory.
pub struct ChatPlatform {
    failure_rate: f64,
    synced: Mutex<HashSet<MemberId>>,
}

impl ChatPlatform {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate,
            synced: Mutex::new(HashSet::new()),
        }
    }

    pub fn synced(&self) -> usize {
        self.synced.lock().len()
    }
}

#[async_trait]
impl Processor<MemberId> for ChatPlatform {
    async fn process(&self, member: MemberId) -> Result<(), ResyncError> {
        let (fail, latency_ms) = {
            let mut rng = rand::thread_rng();
            (rng.gen_bool(self.failure_rate), rng.gen_range(5..50))
        };
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        if fail {
            return Err(ResyncError::processing(member, "chat platform returned 503"));
        }
        if self.synced.lock().insert(member) {
            debug!(member = %member, "member synced");
        }
        Ok(())
    }
}
