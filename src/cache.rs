pub mod keyspace;
pub mod local;
pub mod shared;
pub mod single_flight;
pub mod tiered;
pub mod value;

pub use keyspace::{Generations, Invalidation, Keyspace, MARKET_VOLATILITY_KEY};
pub use shared::{InProcessSharedCache, SharedCache};
pub use tiered::TieredCache;
pub use value::CachedValue;
