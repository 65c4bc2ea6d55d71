use std::{path::Path, time::Duration};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{DurationSecondsWithFrac, serde_as};

use crate::{error::ConfigError, impl_opaque_string};

/// Base URL of one external provider, kept distinct from generic strings so
/// endpoint plumbing stays self-documenting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Url(pub String);
impl_opaque_string!(Url);

impl Default for Url {
    fn default() -> Self {
        Url(String::new())
    }
}

/// Credential attached to every outbound provider request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiKey(pub String);
impl_opaque_string!(ApiKey);

// ================================================================================================
// Engine Configuration
// ================================================================================================

/// The single typed configuration the engine is started with.
///
/// Every threshold the engine consults lives here: TTLs per keyspace, breaker
/// thresholds per endpoint, retry budgets, decimal scale, formula constants,
/// deadlines, queue capacities and pool sizes. Unknown keys in the
/// configuration file are a startup error. Broker configs are live through
/// the config store; everything in this struct requires a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub kernel: KernelConfig,
    pub cache: CacheConfig,
    pub resilience: ResilienceConfig,
    pub endpoints: EndpointsConfig,
    pub audit: AuditConfig,
    pub service: ServiceConfig,
}

impl EngineConfig {
    /// Parses a configuration from a JSON string and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown keys, malformed JSON, or values outside
    /// their validity domain.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Rejects values outside their validity domain before the engine starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kernel.validate()?;
        self.cache.validate()?;
        for policy in [
            &self.resilience.sec_lend,
            &self.resilience.market,
            &self.resilience.event,
        ] {
            policy.validate()?;
        }
        self.audit.validate()?;
        if self.service.request_deadline.is_zero() {
            return Err(ConfigError::InvalidValue(
                "service.request_deadline must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ================================================================================================
// Formula Kernel
// ================================================================================================

/// Constants feeding the decimal formula kernel. Not live-reloadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct KernelConfig {
    /// Decimal scale every monetary component is rounded to, once, with
    /// banker's rounding.
    pub scale: u32,

    /// Denominator of the time proration, conventionally 365.
    pub days_in_year: u32,

    /// Weight of the volatility index in the rate adjustment.
    pub vol_factor: Decimal,

    /// Weight of the event risk factor in the rate adjustment.
    pub event_factor: Decimal,

    /// System-wide borrow rate floor. Per-ticker floors and broker overrides
    /// can only raise it.
    pub global_min_rate: Decimal,

    /// Volatility substituted when no live or cached value is available.
    pub default_volatility_index: Decimal,

    /// ISO 4217 code stamped on every breakdown. Currency conversion is
    /// upstream of this engine.
    pub currency: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            scale: 4,
            days_in_year: 365,
            vol_factor: Decimal::new(1, 2),
            event_factor: Decimal::new(5, 3),
            global_min_rate: Decimal::new(25, 4),
            default_volatility_index: Decimal::new(20, 0),
            currency: "USD".to_string(),
        }
    }
}

impl KernelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.scale > 12 {
            return Err(ConfigError::InvalidValue(format!(
                "kernel.scale must be at most 12, got {}",
                self.scale
            )));
        }
        if self.days_in_year == 0 {
            return Err(ConfigError::InvalidValue(
                "kernel.days_in_year must be positive".to_string(),
            ));
        }
        if self.global_min_rate.is_sign_negative() {
            return Err(ConfigError::InvalidValue(format!(
                "kernel.global_min_rate must be non-negative, got {}",
                self.global_min_rate
            )));
        }
        if self.default_volatility_index.is_sign_negative() {
            return Err(ConfigError::InvalidValue(format!(
                "kernel.default_volatility_index must be non-negative, got {}",
                self.default_volatility_index
            )));
        }
        Ok(())
    }
}

// ================================================================================================
// Cache
// ================================================================================================

/// Sizing and TTL policy of the two-tier cache.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Maximum entry count of the per-process local tier.
    pub local_capacity: usize,

    /// TTLs per keyspace, in seconds.
    pub ttl: KeyspaceTtlConfig,

    /// How long an expired local volatility entry remains eligible as a
    /// fallback after an upstream failure.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub volatility_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: 10_000,
            ttl: KeyspaceTtlConfig::default(),
            volatility_grace: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.local_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "cache.local_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-keyspace TTLs. Rates move intraday, reference data barely moves.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct KeyspaceTtlConfig {
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub borrow: Duration,

    #[serde_as(as = "DurationSecondsWithFrac")]
    pub volatility: Duration,

    #[serde_as(as = "DurationSecondsWithFrac")]
    pub event: Duration,

    #[serde_as(as = "DurationSecondsWithFrac")]
    pub broker: Duration,

    #[serde_as(as = "DurationSecondsWithFrac")]
    pub min_rate: Duration,

    #[serde_as(as = "DurationSecondsWithFrac")]
    pub calc: Duration,
}

impl Default for KeyspaceTtlConfig {
    fn default() -> Self {
        Self {
            borrow: Duration::from_secs(5 * 60),
            volatility: Duration::from_secs(15 * 60),
            event: Duration::from_secs(60 * 60),
            broker: Duration::from_secs(30 * 60),
            min_rate: Duration::from_secs(24 * 60 * 60),
            calc: Duration::from_secs(60),
        }
    }
}

// ================================================================================================
// Resilience
// ================================================================================================

/// Per-endpoint resilience thresholds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ResilienceConfig {
    pub sec_lend: EndpointPolicy,
    pub market: EndpointPolicy,
    pub event: EndpointPolicy,
}

/// Timeout, retry and breaker thresholds for one external endpoint.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EndpointPolicy {
    /// Consecutive failures that trip the breaker from CLOSED to OPEN.
    pub max_failures: u32,

    /// How long an OPEN breaker fails fast before probing again.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub recovery_timeout: Duration,

    /// Concurrent probes admitted while HALF_OPEN.
    pub half_open_probes: u32,

    /// Probe successes required to close the breaker again.
    pub half_open_successes: u32,

    /// Total attempts per call, including the first.
    pub max_attempts: u32,

    /// Base of the exponential backoff between attempts.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub backoff_base: Duration,

    /// Upper bound on a single backoff pause.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub backoff_cap: Duration,

    /// Hard per-attempt deadline.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub attempt_timeout: Duration,

    /// Maximum concurrent in-flight calls, independent of the breaker.
    pub max_concurrency: usize,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self {
            max_failures: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_probes: 1,
            half_open_successes: 3,
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(1),
            max_concurrency: 32,
        }
    }
}

impl EndpointPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_failures == 0 {
            return Err(ConfigError::InvalidValue(
                "resilience.max_failures must be positive".to_string(),
            ));
        }
        if self.half_open_probes == 0 || self.half_open_successes == 0 {
            return Err(ConfigError::InvalidValue(
                "resilience half-open thresholds must be positive".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "resilience.max_attempts must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "resilience.max_concurrency must be positive".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "resilience.attempt_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ================================================================================================
// External Endpoints
// ================================================================================================

/// Connection settings for the three data providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EndpointsConfig {
    pub sec_lend: ProviderConfig,
    pub market: ProviderConfig,
    pub event: ProviderConfig,
}

/// Base URL and credentials of one provider.
///
/// The key may be given inline or through the environment variable named in
/// `api_key_env`, which wins only when the inline key is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProviderConfig {
    pub base_url: Url,
    pub api_key: Option<ApiKey>,
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    /// Resolves the API key from the inline value or the environment.
    pub fn resolve_api_key(&self, endpoint: &str) -> Result<ApiKey, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        if let Some(var) = &self.api_key_env
            && let Ok(value) = std::env::var(var)
        {
            return Ok(ApiKey(value));
        }
        Err(ConfigError::MissingApiKey(endpoint.to_string()))
    }
}

// ================================================================================================
// Audit
// ================================================================================================

/// Queue sizing and deadlines of the audit emission pipeline.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuditConfig {
    /// Bounded capacity of the in-process audit queue (the high watermark).
    pub queue_capacity: usize,

    /// Records persisted per batch insert.
    pub batch_size: usize,

    /// Maximum time a partially filled batch waits before persisting.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub flush_interval: Duration,

    /// How long an enqueue may block at the high watermark before the
    /// calculation is failed. Audit trail is never silently dropped.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub enqueue_deadline: Duration,

    /// Deadline for durable persistence after which an operational alert is
    /// raised.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub persist_deadline: Duration,

    /// Number of drain workers. Partitions map to workers by stable hash, so
    /// per-partition ordering is preserved.
    pub workers: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            batch_size: 64,
            flush_interval: Duration::from_millis(500),
            enqueue_deadline: Duration::from_millis(250),
            persist_deadline: Duration::from_secs(30),
            workers: 2,
        }
    }
}

impl AuditConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 || self.batch_size == 0 || self.workers == 0 {
            return Err(ConfigError::InvalidValue(
                "audit queue capacity, batch size and workers must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// ================================================================================================
// Service
// ================================================================================================

/// Request-level settings of the calculation service.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceConfig {
    /// Overall deadline for one calculation. Child fetches inherit whatever
    /// remains of it.
    #[serde_as(as = "DurationSecondsWithFrac")]
    pub request_deadline: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(5),
        }
    }
}
