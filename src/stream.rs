//! Streams: named fan-out groups of sessions. A stream exists only while
//! something references it; channels, spectator sessions and the global
//! presence feed are all built on top of this primitive.

use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::session::SessionRegistry;

/// The system-wide presence stream every session joins at creation.
pub const MAIN_STREAM: &str = "main";

#[derive(Default)]
pub struct StreamRegistry {
    streams: RwLock<FxHashMap<String, FxHashSet<Uuid>>>,
}

impl StreamRegistry {
    /// Creates the stream if it does not exist yet.
    pub fn ensure(&self, name: &str) {
        self.streams.write().entry(name.to_owned()).or_default();
    }

    /// Removes the stream unconditionally. Callers unsubscribe tokens
    /// first.
    pub fn delete(&self, name: &str) {
        self.streams.write().remove(name);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.streams.read().contains_key(name)
    }

    /// Subscribes a token, creating the stream as needed. Idempotent.
    pub fn add(&self, name: &str, token_id: Uuid) {
        self.streams
            .write()
            .entry(name.to_owned())
            .or_default()
            .insert(token_id);
    }

    pub fn remove(&self, name: &str, token_id: &Uuid) {
        if let Some(subscribers) = self.streams.write().get_mut(name) {
            subscribers.remove(token_id);
        }
    }

    pub fn contains(&self, name: &str, token_id: &Uuid) -> bool {
        self.streams
            .read()
            .get(name)
            .is_some_and(|subscribers| subscribers.contains(token_id))
    }

    pub fn subscribers(&self, name: &str) -> Vec<Uuid> {
        self.streams
            .read()
            .get(name)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.streams.read().get(name).map_or(0, |subscribers| subscribers.len())
    }

    /// Enqueues `payload` once into every subscriber present at the start
    /// of the broadcast, except those in `exclude`. Subscribers whose
    /// session has already been torn down are skipped.
    pub fn broadcast(
        &self,
        sessions: &SessionRegistry,
        name: &str,
        payload: &Bytes,
        exclude: &[Uuid],
    ) {
        for token_id in self.subscribers(name) {
            if exclude.contains(&token_id) {
                continue;
            }

            sessions.enqueue(&token_id, payload.clone());
        }
    }
}
