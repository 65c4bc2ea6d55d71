use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

use crate::cache::{keyspace::Keyspace, value::CachedValue};

struct LocalEntry {
    value: CachedValue,
    created_at: Instant,
    ttl: Duration,
    last_used: u64,
}

impl LocalEntry {
    fn fresh(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) <= self.ttl
    }

    fn within_grace(&self, now: Instant, grace: Duration) -> bool {
        now.duration_since(self.created_at) <= self.ttl + grace
    }
}

/// The per-process cache tier.
///
/// Bounded by entry count with least-recently-used eviction. Expired entries
/// are kept until eviction or invalidation so that the volatility fallback
/// can still read them within its grace window.
pub struct LocalCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, LocalEntry>,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::with_capacity(capacity.min(1024)),
        }
    }

    /// Fresh-only lookup; touches the entry for LRU purposes.
    pub fn get(&mut self, key: &str) -> Option<CachedValue> {
        let now = Instant::now();
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        if !entry.fresh(now) {
            return None;
        }
        entry.last_used = tick;
        Some(entry.value.clone())
    }

    /// Lookup accepting entries past their TTL but within `grace` of it.
    /// Used only by the volatility fallback policy.
    pub fn get_within_grace(&mut self, key: &str, grace: Duration) -> Option<CachedValue> {
        let now = Instant::now();
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        if !entry.within_grace(now, grace) {
            return None;
        }
        entry.last_used = tick;
        Some(entry.value.clone())
    }

    pub fn insert(&mut self, key: String, value: CachedValue, ttl: Duration) {
        self.tick += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            LocalEntry {
                value,
                created_at: Instant::now(),
                ttl,
                last_used: self.tick,
            },
        );
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops every entry of a keyspace. Used on keyspace-wide invalidation.
    pub fn remove_keyspace(&mut self, keyspace: Keyspace) {
        let prefix = keyspace.key("");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}
