//! The key-value store interface: strings with optional expiry, sorted
//! sets, and fire-and-forget pub-sub. This is the narrow surface the core
//! consumes; the in-memory implementation backs tests and single-node
//! deployments.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

#[async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Sets `key` to `value` with a time-to-live, only if the key does not
    /// already hold a live value. Returns whether the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Deletes `key` only while it still holds `value`. Returns whether the
    /// delete happened.
    async fn delete_eq(&self, key: &str, value: &str) -> anyhow::Result<bool>;

    /// Removes `member` from the sorted set at `key`, if present.
    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<()>;

    /// The rank of `member` in the sorted set at `key`, ordered from the
    /// highest score down. `None` when the member is not in the set.
    async fn zrevrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>>;

    /// Publishes a message to a pub-sub channel. Delivery is best-effort;
    /// a channel with no subscribers drops the message.
    async fn publish(&self, channel: &str, message: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

/// In-process [`KeyValue`] store.
#[derive(Default)]
pub struct MemoryKv {
    strings: Mutex<FxHashMap<String, StringEntry>>,
    zsets: Mutex<FxHashMap<String, FxHashMap<String, f64>>>,
    channels: Mutex<FxHashMap<String, broadcast::Sender<String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or rescores) a member in a sorted set. Test seeding helper;
    /// the core itself only ever removes and ranks members.
    pub fn zadd(&self, key: &str, member: &str, score: f64) {
        self.zsets
            .lock()
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned(), score);
    }

    /// The members currently in a sorted set, in no particular order.
    pub fn zset_members(&self, key: &str) -> Vec<String> {
        self.zsets
            .lock()
            .get(key)
            .map(|set| set.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribes to a pub-sub channel. Messages published while no
    /// receiver exists are lost, matching pub-sub semantics.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl KeyValue for MemoryKv {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut strings = self.strings.lock();

        match strings.get(key) {
            Some(entry) if entry.is_live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                strings.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.strings.lock().insert(
            key.to_owned(),
            StringEntry {
                value: value.to_owned(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut strings = self.strings.lock();

        if strings.get(key).is_some_and(StringEntry::is_live) {
            return Ok(false);
        }

        strings.insert(
            key.to_owned(),
            StringEntry {
                value: value.to_owned(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_eq(&self, key: &str, value: &str) -> anyhow::Result<bool> {
        let mut strings = self.strings.lock();

        if strings
            .get(key)
            .is_some_and(|entry| entry.is_live() && entry.value == value)
        {
            strings.remove(key);
            return Ok(true);
        }

        Ok(false)
    }

    async fn zrem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut zsets = self.zsets.lock();

        if let Some(set) = zsets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                zsets.remove(key);
            }
        }

        Ok(())
    }

    async fn zrevrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>> {
        let zsets = self.zsets.lock();

        let Some(set) = zsets.get(key) else {
            return Ok(None);
        };

        if !set.contains_key(member) {
            return Ok(None);
        }

        let mut members: Vec<(&String, f64)> = set.iter().map(|(m, &s)| (m, s)).collect();
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Ok(members
            .iter()
            .position(|(m, _)| m.as_str() == member)
            .map(|p| p as u64))
    }

    async fn publish(&self, channel: &str, message: &str) -> anyhow::Result<()> {
        // A send error just means nobody is listening.
        let _ = self.sender(channel).send(message.to_owned());
        Ok(())
    }
}
