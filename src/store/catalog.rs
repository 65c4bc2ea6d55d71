use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::warn;

use crate::{
    cache::{Keyspace, TieredCache, value::CachedValue},
    data::domain::{BrokerConfig, ClientId, Ticker},
    error::{ConfigError, PricingResult},
    store::ConfigStore,
};

/// Read-through cached view of the config store.
///
/// Broker reads that miss both cache and store surface a hard error; a
/// broker config is never fabricated. Min-rate reads degrade to the
/// system-wide floor instead, because the floor is the conservative answer.
/// Administrative writes publish invalidations on the shared channel so
/// every process repopulates.
pub struct ConfigCatalog {
    store: Arc<dyn ConfigStore>,
    cache: Arc<TieredCache>,
    global_min_rate: Decimal,
}

impl ConfigCatalog {
    pub(crate) fn new(
        store: Arc<dyn ConfigStore>,
        cache: Arc<TieredCache>,
        global_min_rate: Decimal,
    ) -> Self {
        Self {
            store,
            cache,
            global_min_rate,
        }
    }

    pub fn global_min_rate(&self) -> Decimal {
        self.global_min_rate
    }

    /// The active broker config for a client.
    ///
    /// # Errors
    ///
    /// [`ConfigError::BrokerNotFound`] when the store answers and has no
    /// active config; [`ConfigError::Unavailable`] when both cache and
    /// store failed to produce one.
    pub async fn broker(&self, client_id: &ClientId) -> PricingResult<BrokerConfig> {
        if let Some(value) = self.cache.get(Keyspace::Broker, client_id.as_str()).await
            && let Some(config) = value.as_broker()
            && config.active
        {
            return Ok(config.clone());
        }

        let generation = self.cache.generation(Keyspace::Broker);
        match self.store.get_broker(client_id).await {
            Ok(Some(config)) => {
                self.cache.write_through(
                    Keyspace::Broker,
                    client_id.as_str(),
                    CachedValue::Broker(config.clone()),
                    generation,
                );
                Ok(config)
            }
            Ok(None) => Err(ConfigError::BrokerNotFound(client_id.to_string()).into()),
            Err(error) => {
                warn!(%client_id, %error, "Config store unreachable for broker read");
                Err(ConfigError::Unavailable(client_id.to_string()).into())
            }
        }
    }

    /// The effective per-ticker borrow rate floor: the stored reference
    /// floor raised to at least the system-wide minimum. Never fails; a
    /// store outage answers with the floor the engine can stand behind.
    pub async fn min_rate(&self, ticker: &Ticker) -> Decimal {
        if let Some(value) = self.cache.get(Keyspace::Minrate, ticker.as_str()).await
            && let Some(rate) = value.as_min_rate()
        {
            return rate.max(self.global_min_rate);
        }

        let generation = self.cache.generation(Keyspace::Minrate);
        match self.store.get_min_rate(ticker).await {
            Ok(Some(rate)) => {
                self.cache.write_through(
                    Keyspace::Minrate,
                    ticker.as_str(),
                    CachedValue::MinRate(rate),
                    generation,
                );
                rate.max(self.global_min_rate)
            }
            Ok(None) => self.global_min_rate,
            Err(error) => {
                warn!(%ticker, %error, "Config store unreachable for min-rate read");
                self.global_min_rate
            }
        }
    }

    /// Administrative upsert with read-your-writes: the store is updated,
    /// then the `broker:{client_id}` key is invalidated everywhere.
    pub async fn upsert_broker(&self, config: BrokerConfig) -> PricingResult<()> {
        config.validate()?;
        let client_id = config.client_id.clone();
        self.store
            .upsert_broker(config)
            .await
            .map_err(|e| ConfigError::Unavailable(format!("{client_id}: {e}")))?;
        self.cache
            .invalidate(Keyspace::Broker, Some(client_id.as_str()))
            .await;
        Ok(())
    }

    /// Administrative floor update, invalidating `minrate:{ticker}`.
    pub async fn set_min_rate(&self, ticker: &Ticker, rate: Decimal) -> PricingResult<()> {
        if rate.is_sign_negative() {
            return Err(crate::error::DomainError::NegativeRate(rate).into());
        }
        self.store
            .set_min_rate(ticker, rate)
            .await
            .map_err(|e| ConfigError::Unavailable(format!("{ticker}: {e}")))?;
        self.cache
            .invalidate(Keyspace::Minrate, Some(ticker.as_str()))
            .await;
        Ok(())
    }
}
