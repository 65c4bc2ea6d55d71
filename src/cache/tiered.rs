use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    cache::{
        keyspace::{Generations, Invalidation, Keyspace},
        local::LocalCache,
        shared::SharedCache,
        single_flight::{FlightPermit, SingleFlight},
        value::CachedValue,
    },
    config::CacheConfig,
};

/// The two-tier cache: per-process LRU in front of the shared KV.
///
/// Reads consult local first, then shared. Writes go to both, guarded by the
/// keyspace generation so that a fetch started before an invalidation cannot
/// resurrect stale state. A shared-tier outage degrades reads to local-only
/// and never fails a calculation.
pub struct TieredCache {
    local: Mutex<LocalCache>,
    shared: Arc<dyn SharedCache>,
    generations: Generations,
    flight: SingleFlight,
    ttl: crate::config::KeyspaceTtlConfig,
    volatility_grace: Duration,
    shared_healthy: Arc<AtomicBool>,
}

impl TieredCache {
    pub fn new(config: &CacheConfig, shared: Arc<dyn SharedCache>) -> Self {
        Self {
            local: Mutex::new(LocalCache::new(config.local_capacity)),
            shared,
            generations: Generations::default(),
            flight: SingleFlight::default(),
            ttl: config.ttl.clone(),
            volatility_grace: config.volatility_grace,
            shared_healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    // ============================================================================================
    // Reads
    // ============================================================================================

    /// Fresh lookup through both tiers. A shared hit is pulled forward into
    /// the local tier.
    pub async fn get(&self, keyspace: Keyspace, suffix: &str) -> Option<CachedValue> {
        let key = keyspace.key(suffix);
        if let Some(value) = self.local.lock().unwrap().get(&key) {
            return Some(value);
        }

        match self.shared.get(&key).await {
            Ok(Some(raw)) => {
                self.shared_healthy.store(true, Ordering::Release);
                match CachedValue::decode(&raw) {
                    Ok(value) => {
                        self.local.lock().unwrap().insert(
                            key,
                            value.clone(),
                            keyspace.ttl(&self.ttl),
                        );
                        Some(value)
                    }
                    Err(error) => {
                        warn!(%key, %error, "Dropping undecodable shared cache entry");
                        None
                    }
                }
            }
            Ok(None) => {
                self.shared_healthy.store(true, Ordering::Release);
                None
            }
            Err(error) => {
                // Degraded mode: serve from local only, keep going.
                self.shared_healthy.store(false, Ordering::Release);
                warn!(%key, %error, "Shared cache unreachable, degrading to local tier");
                None
            }
        }
    }

    /// Expired-but-recent lookup in the local tier, bounded by the
    /// volatility grace window. Fallback path only.
    pub fn get_within_grace(&self, keyspace: Keyspace, suffix: &str) -> Option<CachedValue> {
        let key = keyspace.key(suffix);
        self.local
            .lock()
            .unwrap()
            .get_within_grace(&key, self.volatility_grace)
    }

    // ============================================================================================
    // Writes
    // ============================================================================================

    /// Writes through both tiers unless the keyspace generation moved since
    /// `started_generation` was snapshotted. Returns whether the write
    /// happened. The shared write is fire-and-forget; a calculation never
    /// blocks on it.
    pub fn write_through(
        &self,
        keyspace: Keyspace,
        suffix: &str,
        value: CachedValue,
        started_generation: u64,
    ) -> bool {
        if self.generations.current(keyspace) != started_generation {
            debug!(
                keyspace = %keyspace,
                suffix,
                "Skipping cache write: keyspace invalidated during fetch"
            );
            return false;
        }

        let key = keyspace.key(suffix);
        let ttl = keyspace.ttl(&self.ttl);
        self.local
            .lock()
            .unwrap()
            .insert(key.clone(), value.clone(), ttl);

        let shared = Arc::clone(&self.shared);
        let healthy = Arc::clone(&self.shared_healthy);
        tokio::spawn(async move {
            let encoded = match value.encode() {
                Ok(encoded) => encoded,
                Err(error) => {
                    warn!(%key, %error, "Failed to encode value for shared cache");
                    return;
                }
            };
            match shared.set(&key, encoded, ttl).await {
                Ok(()) => healthy.store(true, Ordering::Release),
                Err(error) => {
                    healthy.store(false, Ordering::Release);
                    warn!(%key, %error, "Shared cache write failed");
                }
            }
        });
        true
    }

    // ============================================================================================
    // Single-flight
    // ============================================================================================

    /// Claims the fetch flight for a key. Callers re-check the cache after
    /// acquisition; only the task that still misses goes upstream.
    ///
    /// Coalescing is strict per process. Across processes it is best-effort:
    /// the leader claims a short-lived marker through the shared tier's
    /// atomic set-if-absent, so sibling processes whose fetch completes
    /// first populate the key the others' re-check will hit.
    pub async fn begin_flight(&self, keyspace: Keyspace, suffix: &str) -> FlightPermit {
        let key = keyspace.key(suffix);
        let permit = self.flight.acquire(&key).await;
        if let Err(error) = self
            .shared
            .set_if_absent(
                &format!("flight:{key}"),
                String::from("1"),
                Duration::from_secs(2),
            )
            .await
        {
            debug!(%key, %error, "Cross-process flight marker unavailable");
        }
        permit
    }

    // ============================================================================================
    // Generations & Invalidation
    // ============================================================================================

    pub fn generation(&self, keyspace: Keyspace) -> u64 {
        self.generations.current(keyspace)
    }

    pub fn config_generation(&self) -> u64 {
        self.generations.config_generation()
    }

    pub fn signal_generation(&self) -> u64 {
        self.generations.signal_generation()
    }

    /// Invalidates a key (or a whole keyspace) everywhere: bumps the local
    /// generation, drops local entries, removes the shared entry and
    /// publishes to every subscribed process.
    pub async fn invalidate(&self, keyspace: Keyspace, suffix: Option<&str>) {
        let generation = self.generations.bump(keyspace);
        {
            let mut local = self.local.lock().unwrap();
            match suffix {
                Some(suffix) => local.remove(&keyspace.key(suffix)),
                None => local.remove_keyspace(keyspace),
            }
        }

        if let Some(suffix) = suffix
            && let Err(error) = self.shared.remove(&keyspace.key(suffix)).await
        {
            self.shared_healthy.store(false, Ordering::Release);
            warn!(%error, "Failed to remove invalidated key from shared cache");
        }

        let message = Invalidation {
            keyspace,
            key: suffix.map(|s| keyspace.key(s)),
            generation,
        };
        if let Err(error) = self.shared.publish(message).await {
            self.shared_healthy.store(false, Ordering::Release);
            warn!(%error, "Failed to publish invalidation");
        }
    }

    /// Applies an invalidation observed on the shared channel. Idempotent.
    pub fn apply_invalidation(&self, message: &Invalidation) {
        self.generations.observe(message.keyspace, message.generation);
        let mut local = self.local.lock().unwrap();
        match &message.key {
            Some(key) => local.remove(key),
            None => local.remove_keyspace(message.keyspace),
        }
    }

    /// Subscribes this process to the shared invalidation channel. The task
    /// runs for the life of the engine.
    pub fn spawn_invalidation_subscriber(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let mut rx = cache.shared.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => cache.apply_invalidation(&message),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        // Safe recovery from a lagged subscription: assume
                        // everything local is suspect.
                        warn!(missed, "Invalidation channel lagged, clearing local tier");
                        for keyspace in [
                            Keyspace::Borrow,
                            Keyspace::Vol,
                            Keyspace::Event,
                            Keyspace::Broker,
                            Keyspace::Minrate,
                            Keyspace::Calc,
                        ] {
                            cache.generations.bump(keyspace);
                            cache.local.lock().unwrap().remove_keyspace(keyspace);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    // ============================================================================================
    // Health
    // ============================================================================================

    pub fn shared_healthy(&self) -> bool {
        self.shared_healthy.load(Ordering::Acquire)
    }

    pub fn local_len(&self) -> usize {
        self.local.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::cache::shared::InProcessSharedCache;

    fn cache() -> Arc<TieredCache> {
        Arc::new(TieredCache::new(
            &CacheConfig::default(),
            Arc::new(InProcessSharedCache::new()),
        ))
    }

    fn min_rate(raw: i64) -> CachedValue {
        CachedValue::MinRate(Decimal::new(raw, 4))
    }

    #[tokio::test]
    async fn write_through_is_visible_in_both_tiers() {
        let cache = cache();
        let generation = cache.generation(Keyspace::Minrate);
        assert!(cache.write_through(Keyspace::Minrate, "GME", min_rate(100), generation));

        assert_eq!(
            cache.get(Keyspace::Minrate, "GME").await,
            Some(min_rate(100))
        );
    }

    #[tokio::test]
    async fn stale_fetch_does_not_overwrite_after_invalidation() {
        let cache = cache();
        let generation = cache.generation(Keyspace::Minrate);
        cache.invalidate(Keyspace::Minrate, Some("GME")).await;

        assert!(!cache.write_through(Keyspace::Minrate, "GME", min_rate(100), generation));
        assert_eq!(cache.get(Keyspace::Minrate, "GME").await, None);
    }

    #[tokio::test]
    async fn invalidation_drops_local_and_shared_entries() {
        let cache = cache();
        let generation = cache.generation(Keyspace::Broker);
        cache.write_through(Keyspace::Broker, "X", min_rate(1), generation);
        // Let the spawned shared write land.
        tokio::task::yield_now().await;

        cache.invalidate(Keyspace::Broker, Some("X")).await;
        assert_eq!(cache.get(Keyspace::Broker, "X").await, None);
    }

    #[tokio::test]
    async fn applied_invalidations_are_idempotent() {
        let cache = cache();
        let message = Invalidation {
            keyspace: Keyspace::Vol,
            key: None,
            generation: 9,
        };
        cache.apply_invalidation(&message);
        cache.apply_invalidation(&message);
        assert_eq!(cache.generation(Keyspace::Vol), 9);
    }

    #[tokio::test]
    async fn subscriber_applies_remote_invalidations() {
        let shared = Arc::new(InProcessSharedCache::new());
        let cache = Arc::new(TieredCache::new(&CacheConfig::default(), shared.clone()));
        let task = cache.spawn_invalidation_subscriber();

        let generation = cache.generation(Keyspace::Borrow);
        cache.write_through(Keyspace::Borrow, "TSLA", min_rate(50), generation);
        shared
            .publish(Invalidation {
                keyspace: Keyspace::Borrow,
                key: Some("borrow:TSLA".into()),
                generation: generation + 1,
            })
            .await
            .unwrap();
        // Give the subscriber task a turn to apply the message.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(cache.generation(Keyspace::Borrow) > generation);
        task.abort();
    }
}
