// === Public Modules (The Canonical Paths) ===
pub mod audit;
pub mod config;
pub mod data;
pub mod error;
pub mod math;
pub mod service;

// === Private Implementation Details ===
mod cache;
mod clients;
mod macros;
mod resilience;
mod store;

// === Facades (Re-exporting internals) ===
// Expose the cache seam without making the whole module public
pub use crate::cache::{InProcessSharedCache, SharedCache};

// Expose the client traits so deployments can substitute providers
pub use crate::clients::{
    EventApi, EventClient, MarketApi, MarketClient, SecLendApi, SecLendClient,
};

// Expose the store seams and their in-memory implementations
pub use crate::store::{
    AuditStore, ConfigCatalog, ConfigStore, MemoryAuditStore, MemoryConfigStore,
};

// Expose resilience vocabulary used by the health surface
pub use crate::resilience::{BreakerState, Endpoint};

// === Convenience ===
pub use crate::service::{PricingEngine, PricingEngineBuilder};
