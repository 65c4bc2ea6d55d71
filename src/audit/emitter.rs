use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{Instant, timeout},
};
use tracing::{debug, error, warn};

use crate::{
    audit::{
        chain::{GENESIS_HASH, seal},
        record::{AuditDraft, AuditRecord},
    },
    config::AuditConfig,
    data::domain::ClientId,
    error::AuditError,
    store::audit::AuditStore,
};

/// The asynchronous, at-least-once audit pipeline.
///
/// Calculations enqueue drafts onto a bounded queue sharded by client
/// partition; a fixed partition-to-shard mapping keeps per-partition records
/// in completion order. Each shard worker drains in batches, threads the
/// hash chain, and persists through [`AuditStore::append_batch`], retrying
/// until the store accepts. An enqueue that cannot be admitted within the
/// configured deadline fails the calculation: the audit trail is never
/// silently dropped.
pub struct AuditEmitter {
    shards: Vec<async_channel::Sender<AuditDraft>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    enqueue_deadline: Duration,
    alert: Arc<AtomicBool>,
}

impl AuditEmitter {
    /// Starts the worker pool. One queue and one worker per shard; capacity
    /// is the configured high watermark split across shards.
    pub fn spawn(config: &AuditConfig, store: Arc<dyn AuditStore>) -> Self {
        let shard_count = config.workers;
        let capacity = (config.queue_capacity / shard_count).max(1);
        let alert = Arc::new(AtomicBool::new(false));

        let mut shards = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            let (tx, rx) = async_channel::bounded(capacity);
            shards.push(tx);
            workers.push(tokio::spawn(drain_shard(
                shard,
                rx,
                Arc::clone(&store),
                config.clone(),
                Arc::clone(&alert),
            )));
        }

        Self {
            shards,
            workers: Mutex::new(workers),
            enqueue_deadline: config.enqueue_deadline,
            alert,
        }
    }

    /// Admits a draft, blocking up to the enqueue deadline at the high
    /// watermark.
    pub async fn enqueue(&self, draft: AuditDraft) -> Result<(), AuditError> {
        let shard = shard_for(&draft.client_id, self.shards.len());
        match timeout(self.enqueue_deadline, self.shards[shard].send(draft)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(AuditError::QueueClosed),
            Err(_) => Err(AuditError::Backpressure {
                waited: self.enqueue_deadline,
            }),
        }
    }

    /// Records waiting in the queue, summed over shards.
    pub fn queue_depth(&self) -> usize {
        self.shards.iter().map(|tx| tx.len()).sum()
    }

    /// Whether any batch missed the persist deadline since startup.
    pub fn alert_raised(&self) -> bool {
        self.alert.load(Ordering::Acquire)
    }

    /// Stops accepting records, drains what is queued, and waits for the
    /// workers to finish persisting.
    pub async fn shutdown(&self) {
        for shard in &self.shards {
            shard.close();
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if let Err(error) = worker.await {
                error!(%error, "Audit worker panicked during shutdown");
            }
        }
    }
}

/// Stable partition-to-shard mapping.
fn shard_for(client_id: &ClientId, shards: usize) -> usize {
    let digest = blake3::hash(client_id.as_str().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % shards as u64) as usize
}

async fn drain_shard(
    shard: usize,
    rx: async_channel::Receiver<AuditDraft>,
    store: Arc<dyn AuditStore>,
    config: AuditConfig,
    alert: Arc<AtomicBool>,
) {
    // Chain tails of every partition this shard owns, lazily seeded from
    // the store so restarts extend existing chains instead of forking them.
    let mut tails: HashMap<ClientId, String> = HashMap::new();

    while let Ok(first) = rx.recv().await {
        let mut batch = vec![first];
        let flush_deadline = Instant::now() + config.flush_interval;
        while batch.len() < config.batch_size {
            let remaining = flush_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Ok(draft)) => batch.push(draft),
                _ => break,
            }
        }

        let mut records = Vec::with_capacity(batch.len());
        for draft in batch {
            let prev = match tails.get(&draft.client_id) {
                Some(tail) => tail.clone(),
                None => seed_tail(&*store, &draft.client_id).await,
            };
            let record = seal(draft, &prev);
            tails.insert(record.client_id.clone(), record.hash.clone());
            records.push(record);
        }

        persist_with_retry(shard, &*store, &records, &config, &alert).await;
    }
    debug!(shard, "Audit shard drained and stopped");
}

/// Reads the partition's persisted chain tail, retrying until the store
/// answers. Sealing against a guessed tail would fork the chain, so the
/// shard waits instead; queue backpressure propagates to callers.
async fn seed_tail(store: &dyn AuditStore, partition: &ClientId) -> String {
    let mut backoff = Duration::from_millis(50);
    loop {
        match store.last_hash(partition).await {
            Ok(Some(tail)) => return tail,
            Ok(None) => return GENESIS_HASH.to_string(),
            Err(error) => {
                warn!(%partition, %error, "Failed to read chain tail, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }
        }
    }
}

async fn persist_with_retry(
    shard: usize,
    store: &dyn AuditStore,
    records: &[AuditRecord],
    config: &AuditConfig,
    alert: &AtomicBool,
) {
    let started = Instant::now();
    let mut backoff = Duration::from_millis(50);
    let mut alerted = false;
    loop {
        match store.append_batch(records).await {
            Ok(()) => {
                debug!(shard, count = records.len(), "Audit batch persisted");
                return;
            }
            Err(error) => {
                if !alerted && started.elapsed() >= config.persist_deadline {
                    // Operational alert: durable persistence is overdue.
                    alert.store(true, Ordering::Release);
                    alerted = true;
                    error!(
                        shard,
                        count = records.len(),
                        deadline = %humantime::format_duration(config.persist_deadline),
                        %error,
                        "Audit persist deadline exceeded"
                    );
                } else {
                    warn!(shard, %error, "Audit batch rejected, retrying");
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }
        }
    }
}
