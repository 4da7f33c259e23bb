//! Advisory named locks, leased through the key-value store.
//!
//! A lock is a `SET NX` with a TTL and a random unlock token; release
//! deletes the key only while it still holds that token. Holders that die
//! release naturally when the lease runs out, so a crashed request can stall
//! later acquirers for at most the lease duration.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::ensure;
use rand::Rng;
use tracing::trace;
use uuid::Uuid;

use crate::kv::KeyValue;

/// The lock serializing session-table critical sections across the server.
pub const TOKENS_LOCK: &str = "akatsuki:locks:tokens";

const DEFAULT_LEASE: Duration = Duration::from_secs(10);
const RETRY_BASE_MS: u64 = 50;

#[derive(Clone)]
pub struct LockManager {
    kv: Arc<dyn KeyValue>,
    lease: Duration,
}

impl LockManager {
    pub fn new(kv: Arc<dyn KeyValue>) -> Self {
        Self::with_lease(kv, DEFAULT_LEASE)
    }

    pub fn with_lease(kv: Arc<dyn KeyValue>, lease: Duration) -> Self {
        Self { kv, lease }
    }

    /// Acquires a named lock, retrying with jittered backoff on contention.
    /// Gives up after twice the lease duration, by which point any previous
    /// holder's lease must have expired.
    pub async fn acquire(&self, name: &str) -> anyhow::Result<LockGuard> {
        let unlock_token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.lease * 2;

        loop {
            if self.kv.set_nx_ex(name, &unlock_token, self.lease).await? {
                return Ok(LockGuard {
                    kv: Arc::clone(&self.kv),
                    key: name.to_owned(),
                    unlock_token,
                });
            }

            ensure!(
                Instant::now() < deadline,
                "timed out waiting for lock {name}"
            );

            trace!(lock = name, "lock contended, backing off");

            let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_MS);
            tokio::time::sleep(Duration::from_millis(RETRY_BASE_MS + jitter)).await;
        }
    }
}

/// A held lock. Dropping the guard without [`release`](Self::release) leaves
/// the key to lapse with its lease.
pub struct LockGuard {
    kv: Arc<dyn KeyValue>,
    key: String,
    unlock_token: String,
}

impl LockGuard {
    /// Releases the lock, if this guard still owns it.
    pub async fn release(self) -> anyhow::Result<()> {
        self.kv.delete_eq(&self.key, &self.unlock_token).await?;
        Ok(())
    }
}
