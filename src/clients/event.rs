use std::time::Duration;

use async_trait::async_trait;

use crate::{
    clients::http::HttpCore,
    config::ProviderConfig,
    data::domain::{CorporateEvent, Ticker},
    error::{ClientError, ConfigError},
};

/// Corporate event calendar: upcoming events with assessed risk factors.
#[async_trait]
pub trait EventApi: Send + Sync {
    /// Events for `ticker` within the next `window_days` days. An empty
    /// calendar is a normal answer, not an error.
    async fn get_events(
        &self,
        ticker: &Ticker,
        window_days: u32,
        deadline: Duration,
    ) -> Result<Vec<CorporateEvent>, ClientError>;
}

/// HTTP client for `GET /events/{ticker}?window={days}`.
pub struct EventClient {
    core: HttpCore,
}

impl EventClient {
    pub fn new(provider: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            core: HttpCore::new(provider, "event")?,
        })
    }
}

#[async_trait]
impl EventApi for EventClient {
    async fn get_events(
        &self,
        ticker: &Ticker,
        window_days: u32,
        deadline: Duration,
    ) -> Result<Vec<CorporateEvent>, ClientError> {
        let path = format!("/events/{ticker}");
        let query = [("window", window_days.to_string())];
        let events: Vec<CorporateEvent> = self.core.get_json(&path, &query, deadline).await?;

        for event in &events {
            event
                .validate()
                .map_err(|e| ClientError::InvalidPayload(e.to_string()))?;
        }
        Ok(events)
    }
}
