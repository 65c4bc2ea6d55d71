pub mod audit;
pub mod catalog;
pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{
    data::domain::{BrokerConfig, ClientId, Ticker},
    error::StoreError,
};

pub use audit::AuditStore;
pub use catalog::ConfigCatalog;
pub use memory::{MemoryAuditStore, MemoryConfigStore};

/// The persistent store of broker configs and per-ticker rate floors, as the
/// engine consumes it.
///
/// Reads are explicit; there is no lazy object graph behind these methods.
/// Writes are administrative, rare, and must be read-your-writes so that a
/// subsequent cache invalidation repopulates with the new state.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// The active config for a client, or `None` when no active config
    /// exists. At most one config per client is active.
    async fn get_broker(&self, client_id: &ClientId) -> Result<Option<BrokerConfig>, StoreError>;

    /// The reference-data borrow rate floor for a ticker, if one is set.
    async fn get_min_rate(&self, ticker: &Ticker) -> Result<Option<Decimal>, StoreError>;

    async fn upsert_broker(&self, config: BrokerConfig) -> Result<(), StoreError>;

    async fn set_min_rate(&self, ticker: &Ticker, rate: Decimal) -> Result<(), StoreError>;
}
