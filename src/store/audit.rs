use async_trait::async_trait;

use crate::{audit::record::AuditRecord, data::domain::ClientId, error::AuditError};

/// The durable append-only audit log, as the engine consumes it.
///
/// Backed by an append-only table or log with atomic batch insert.
/// Retention and cold-storage archival are the store's concern; the engine
/// only appends and verifies.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Atomically appends a batch. Records within a batch are already in
    /// their partitions' chain order and must be persisted in that order.
    async fn append_batch(&self, records: &[AuditRecord]) -> Result<(), AuditError>;

    /// Hash of the newest persisted record of a partition, if any. Seeds
    /// the chain after a restart.
    async fn last_hash(&self, partition: &ClientId) -> Result<Option<String>, AuditError>;

    /// Full partition in persistence order, for chain verification.
    async fn read_partition(&self, partition: &ClientId) -> Result<Vec<AuditRecord>, AuditError>;
}
