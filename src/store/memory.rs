use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::{
    audit::record::AuditRecord,
    data::domain::{BrokerConfig, ClientId, Ticker},
    error::{AuditError, StoreError},
    store::{ConfigStore, audit::AuditStore},
};

/// In-memory [`ConfigStore`] for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryConfigStore {
    brokers: RwLock<HashMap<ClientId, BrokerConfig>>,
    min_rates: RwLock<HashMap<Ticker, Decimal>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_broker(self, config: BrokerConfig) -> Self {
        self.brokers
            .write()
            .await
            .insert(config.client_id.clone(), config);
        self
    }

    pub async fn with_min_rate(self, ticker: Ticker, rate: Decimal) -> Self {
        self.min_rates.write().await.insert(ticker, rate);
        self
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get_broker(&self, client_id: &ClientId) -> Result<Option<BrokerConfig>, StoreError> {
        Ok(self
            .brokers
            .read()
            .await
            .get(client_id)
            .filter(|config| config.active)
            .cloned())
    }

    async fn get_min_rate(&self, ticker: &Ticker) -> Result<Option<Decimal>, StoreError> {
        Ok(self.min_rates.read().await.get(ticker).copied())
    }

    async fn upsert_broker(&self, config: BrokerConfig) -> Result<(), StoreError> {
        self.brokers
            .write()
            .await
            .insert(config.client_id.clone(), config);
        Ok(())
    }

    async fn set_min_rate(&self, ticker: &Ticker, rate: Decimal) -> Result<(), StoreError> {
        self.min_rates.write().await.insert(ticker.clone(), rate);
        Ok(())
    }
}

/// In-memory [`AuditStore`] with per-partition append order.
#[derive(Default)]
pub struct MemoryAuditStore {
    partitions: RwLock<HashMap<ClientId, Vec<AuditRecord>>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across every partition.
    pub async fn len(&self) -> usize {
        self.partitions
            .read()
            .await
            .values()
            .map(Vec::len)
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Test hook: overwrite one record in place, bypassing the chain.
    pub async fn tamper(&self, partition: &ClientId, index: usize, record: AuditRecord) {
        if let Some(records) = self.partitions.write().await.get_mut(partition) {
            records[index] = record;
        }
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append_batch(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        let mut partitions = self.partitions.write().await;
        for record in records {
            partitions
                .entry(record.client_id.clone())
                .or_default()
                .push(record.clone());
        }
        Ok(())
    }

    async fn last_hash(&self, partition: &ClientId) -> Result<Option<String>, AuditError> {
        Ok(self
            .partitions
            .read()
            .await
            .get(partition)
            .and_then(|records| records.last())
            .map(|record| record.hash.clone()))
    }

    async fn read_partition(&self, partition: &ClientId) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self
            .partitions
            .read()
            .await
            .get(partition)
            .cloned()
            .unwrap_or_default())
    }
}
