use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

pub type PricingResult<T> = Result<T, PricingError>;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Calculation(#[from] CalculationError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Errors caused by invalid caller inputs. Surface as 4xx-equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Invalid ticker symbol: '{0}'")]
    InvalidTicker(String),

    #[error("Position value must be positive, got {0}")]
    NonPositivePositionValue(Decimal),

    #[error("Loan days must be positive, got {0}")]
    InvalidLoanDays(i64),

    #[error("Borrow rate must be non-negative, got {0}")]
    NegativeRate(Decimal),

    #[error("Volatility index must be non-negative, got {0}")]
    NegativeVolatility(Decimal),

    #[error("Event risk factor must lie in 0..=10, got {0}")]
    EventRiskOutOfRange(u8),

    #[error("Markup percent must be non-negative, got {0}")]
    NegativeMarkup(Decimal),

    #[error("Transaction fee value must be non-negative, got {0}")]
    NegativeTransactionFee(Decimal),

    #[error("Client id must not be empty")]
    EmptyClientId,

    #[error("Decimal arithmetic overflowed the representable range")]
    NumericOverflow,
}

/// Errors related to broker configuration and the engine configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No active broker config for client '{0}'")]
    BrokerNotFound(String),

    #[error("Broker config unavailable for client '{0}': store unreachable and cache missed")]
    Unavailable(String),

    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Missing API key for endpoint '{0}'")]
    MissingApiKey(String),
}

/// Errors internal to the cache layer. Never fail a calculation on these.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Shared cache unreachable: {0}")]
    SharedUnavailable(String),

    #[error("Failed to encode/decode cached value: {0}")]
    Codec(String),

    #[error("Invalidation channel closed")]
    ChannelClosed,
}

/// Errors produced by the resilience wrapper around outbound calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    #[error("Circuit open for endpoint '{endpoint}'")]
    EndpointOpen { endpoint: String },

    #[error("Attempt deadline exceeded for endpoint '{endpoint}'")]
    EndpointTimeout { endpoint: String },

    #[error("Endpoint '{endpoint}' unavailable: {last_error}")]
    Unavailable { endpoint: String, last_error: String },
}

/// Errors produced by the typed external data clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Upstream returned status {status}")]
    Upstream { status: u16 },

    #[error("Upstream rate limited the request")]
    RateLimited,

    #[error("No data available for '{0}'")]
    NotFound(String),

    #[error("Upstream rejected the request with status {status}")]
    Rejected { status: u16 },

    #[error("Failed to decode upstream payload: {0}")]
    Decode(String),

    #[error("Upstream payload violates contract: {0}")]
    InvalidPayload(String),
}

impl ClientError {
    /// Transient failures are retried; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Upstream { .. } | Self::RateLimited
        )
    }
}

/// A single outbound fetch either fails in the client or in the wrapper.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

/// A formula precondition failed at runtime. Always audit-logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error("Calculation precondition failed: {0}")]
    Precondition(String),
}

/// A persistent-store operation failed. Wrapped into a domain-appropriate
/// error by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Store operation failed: {0}")]
pub struct StoreError(pub String);

/// Errors in the audit emission pipeline.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit queue saturated, enqueue abandoned after {}", humantime::format_duration(*.waited))]
    Backpressure { waited: Duration },

    #[error("Audit queue closed")]
    QueueClosed,

    #[error("Audit store rejected batch: {0}")]
    Store(String),

    #[error("Audit hash chain broken at record index {index}")]
    ChainBroken { index: usize },
}
