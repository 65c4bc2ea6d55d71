pub mod breaker;
pub mod policy;
pub mod retry;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::config::{EndpointPolicy, ResilienceConfig};

pub use breaker::{BreakerState, CircuitBreaker};
pub use policy::{EndpointGuard, RequestBudget};
pub use retry::RetryPolicy;

/// The external endpoints the engine calls, each with its own breaker,
/// retry budget and concurrency cap.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    SecLend,
    Market,
    Event,
}

impl Endpoint {
    /// The configured resilience thresholds for this endpoint.
    pub fn policy<'a>(&self, config: &'a ResilienceConfig) -> &'a EndpointPolicy {
        match self {
            Self::SecLend => &config.sec_lend,
            Self::Market => &config.market,
            Self::Event => &config.event,
        }
    }
}
