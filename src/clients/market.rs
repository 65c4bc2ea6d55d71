use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    clients::http::HttpCore,
    config::ProviderConfig,
    data::{domain::Ticker, signal::VolatilitySignal},
    error::{ClientError, ConfigError},
};

/// Market data: per-ticker volatility and the market-wide VIX.
#[async_trait]
pub trait MarketApi: Send + Sync {
    async fn ticker_volatility(
        &self,
        ticker: &Ticker,
        deadline: Duration,
    ) -> Result<VolatilitySignal, ClientError>;

    async fn market_vix(&self, deadline: Duration) -> Result<VolatilitySignal, ClientError>;
}

#[derive(Debug, Deserialize)]
struct VolatilityPayload {
    value: Decimal,
    as_of: DateTime<Utc>,
}

impl VolatilityPayload {
    fn into_signal(self) -> Result<VolatilitySignal, ClientError> {
        if self.value.is_sign_negative() {
            return Err(ClientError::InvalidPayload(format!(
                "negative volatility index {}",
                self.value
            )));
        }
        Ok(VolatilitySignal {
            value: self.value,
            as_of: self.as_of,
        })
    }
}

/// HTTP client for `GET /volatility/{ticker}` and `GET /vix`.
pub struct MarketClient {
    core: HttpCore,
}

impl MarketClient {
    pub fn new(provider: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            core: HttpCore::new(provider, "market")?,
        })
    }
}

#[async_trait]
impl MarketApi for MarketClient {
    async fn ticker_volatility(
        &self,
        ticker: &Ticker,
        deadline: Duration,
    ) -> Result<VolatilitySignal, ClientError> {
        let path = format!("/volatility/{ticker}");
        let payload: VolatilityPayload = self.core.get_json(&path, &[], deadline).await?;
        payload.into_signal()
    }

    async fn market_vix(&self, deadline: Duration) -> Result<VolatilitySignal, ClientError> {
        let payload: VolatilityPayload = self.core.get_json("/vix", &[], deadline).await?;
        payload.into_signal()
    }
}
