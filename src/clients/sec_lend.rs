use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    clients::http::HttpCore,
    config::ProviderConfig,
    data::{domain::Ticker, signal::BorrowSignal},
    error::{ClientError, ConfigError},
};

/// The securities-lending venue: borrow rate and availability per ticker.
#[async_trait]
pub trait SecLendApi: Send + Sync {
    /// Fetches the current borrow quote.
    ///
    /// A venue-side "rate not available" is [`ClientError::NotFound`], never
    /// a silent zero rate.
    async fn get_borrow(
        &self,
        ticker: &Ticker,
        deadline: Duration,
    ) -> Result<BorrowSignal, ClientError>;
}

#[derive(Debug, Deserialize)]
struct BorrowPayload {
    rate: Decimal,
    status: String,
    as_of: DateTime<Utc>,
}

/// HTTP client for `GET /borrows/{ticker}`.
pub struct SecLendClient {
    core: HttpCore,
}

impl SecLendClient {
    pub fn new(provider: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            core: HttpCore::new(provider, "sec_lend")?,
        })
    }
}

#[async_trait]
impl SecLendApi for SecLendClient {
    async fn get_borrow(
        &self,
        ticker: &Ticker,
        deadline: Duration,
    ) -> Result<BorrowSignal, ClientError> {
        let path = format!("/borrows/{ticker}");
        let payload: BorrowPayload = match self.core.get_json(&path, &[], deadline).await {
            Err(ClientError::NotFound(_)) => {
                return Err(ClientError::NotFound(ticker.to_string()));
            }
            other => other?,
        };

        if payload.rate <= Decimal::ZERO {
            return Err(ClientError::InvalidPayload(format!(
                "non-positive borrow rate {} for {ticker}",
                payload.rate
            )));
        }
        let status = payload.status.parse().map_err(|_| {
            ClientError::InvalidPayload(format!("unknown borrow status '{}'", payload.status))
        })?;

        Ok(BorrowSignal {
            rate: payload.rate,
            status,
            as_of: payload.as_of,
        })
    }
}
