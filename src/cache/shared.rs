use std::{collections::HashMap, sync::Mutex, time::Duration};

use async_trait::async_trait;
use tokio::{sync::broadcast, time::Instant};

use crate::{cache::keyspace::Invalidation, error::CacheError};

/// The networked cache tier, as the engine consumes it.
///
/// Any key/value service with per-key TTLs, an atomic set-if-absent and a
/// pub/sub channel can sit behind this trait. Values are opaque strings;
/// the tiered cache owns the encoding. Implementations must be cheap to
/// clone via `Arc` and safe under concurrent use.
#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Atomically sets the key only when absent. Returns whether the write
    /// happened. Backs the cross-process single-flight lock.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration)
    -> Result<bool, CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    /// Publishes an invalidation to every subscribed process, including the
    /// publishing one.
    async fn publish(&self, invalidation: Invalidation) -> Result<(), CacheError>;

    fn subscribe(&self) -> broadcast::Receiver<Invalidation>;
}

struct SharedEntry {
    value: String,
    expires_at: Instant,
}

/// In-process [`SharedCache`] used by tests and single-node deployments.
///
/// Expiry is lazy: entries are dropped when read past their deadline.
pub struct InProcessSharedCache {
    entries: Mutex<HashMap<String, SharedEntry>>,
    channel: broadcast::Sender<Invalidation>,
}

impl InProcessSharedCache {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(HashMap::new()),
            channel,
        }
    }
}

impl Default for InProcessSharedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCache for InProcessSharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            SharedEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        let live = entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > Instant::now());
        if live {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            SharedEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn publish(&self, invalidation: Invalidation) -> Result<(), CacheError> {
        // A send only fails when nobody subscribes, which is not an error
        // for an invalidation broadcast.
        let _ = self.channel.send(invalidation);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.channel.subscribe()
    }
}
