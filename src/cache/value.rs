use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    data::{
        breakdown::FeeBreakdown,
        domain::{BrokerConfig, CorporateEvent},
        signal::{BorrowSignal, VolatilitySignal},
    },
    error::CacheError,
};

/// The typed payloads the cache tiers carry.
///
/// The local tier stores these directly; the shared tier stores the JSON
/// encoding, since a networked KV only moves strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedValue {
    Borrow(BorrowSignal),
    Volatility(VolatilitySignal),
    Events(Vec<CorporateEvent>),
    Broker(BrokerConfig),
    MinRate(Decimal),
    Breakdown(FeeBreakdown),
}

impl CachedValue {
    pub fn encode(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::Codec(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(|e| CacheError::Codec(e.to_string()))
    }

    pub fn as_borrow(&self) -> Option<&BorrowSignal> {
        match self {
            Self::Borrow(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn as_volatility(&self) -> Option<&VolatilitySignal> {
        match self {
            Self::Volatility(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn as_events(&self) -> Option<&[CorporateEvent]> {
        match self {
            Self::Events(events) => Some(events),
            _ => None,
        }
    }

    pub fn as_broker(&self) -> Option<&BrokerConfig> {
        match self {
            Self::Broker(config) => Some(config),
            _ => None,
        }
    }

    pub fn as_min_rate(&self) -> Option<Decimal> {
        match self {
            Self::MinRate(rate) => Some(*rate),
            _ => None,
        }
    }

    pub fn as_breakdown(&self) -> Option<&FeeBreakdown> {
        match self {
            Self::Breakdown(breakdown) => Some(breakdown),
            _ => None,
        }
    }
}
