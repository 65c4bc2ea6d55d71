use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Coalesces concurrent cache misses for the same key.
///
/// The first task to acquire a key's flight becomes the leader and performs
/// the upstream fetch; followers park on the same lock and, once admitted,
/// re-check the cache instead of fetching. At most one fetch is therefore in
/// flight per key per process.
#[derive(Default)]
pub struct SingleFlight {
    locks: LockMap,
}

impl SingleFlight {
    /// Acquires the flight for `key`, waiting behind the current leader if
    /// one exists. The returned permit releases the flight on drop.
    pub async fn acquire(&self, key: &str) -> FlightPermit {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        FlightPermit {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }
}

/// Exclusive permission to fetch one key. Dropping it admits the next waiter
/// and garbage-collects the lock entry when nobody else is waiting.
pub struct FlightPermit {
    key: String,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        // Release before inspecting the waiter count.
        self.guard.take();
        let mut locks = self.locks.lock().unwrap();
        if let Some(lock) = locks.get(&self.key)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn only_the_leader_fetches() {
        let flight = Arc::new(SingleFlight::default());
        let fetched = Arc::new(AtomicUsize::new(0));
        let cached = Arc::new(Mutex::new(None::<u64>));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let flight = flight.clone();
                let fetched = fetched.clone();
                let cached = cached.clone();
                tokio::spawn(async move {
                    let _permit = flight.acquire("borrow:TSLA").await;
                    if cached.lock().unwrap().is_none() {
                        fetched.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        *cached.lock().unwrap() = Some(42);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(fetched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lock_entries_are_garbage_collected() {
        let flight = SingleFlight::default();
        {
            let _permit = flight.acquire("vol:AAPL").await;
        }
        assert!(flight.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn distinct_keys_do_not_serialize() {
        let flight = SingleFlight::default();
        let first = flight.acquire("borrow:AAPL").await;
        // Must not deadlock waiting on the unrelated key's flight.
        let _second = flight.acquire("borrow:GME").await;
        drop(first);
    }
}
