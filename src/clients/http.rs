use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::{
    config::{ApiKey, ProviderConfig},
    error::{ClientError, ConfigError},
    impl_opaque_string,
};

/// Correlation id attached to every outbound request for cross-system
/// tracing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);
impl_opaque_string!(CorrelationId);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }
}

/// Shared HTTP plumbing of the three data clients: base URL joining, API key
/// and correlation headers, per-request deadline, and the status-to-error
/// mapping the retry classifier relies on.
pub struct HttpCore {
    http: reqwest::Client,
    base_url: String,
    api_key: ApiKey,
}

impl HttpCore {
    pub fn new(provider: &ProviderConfig, endpoint: &str) -> Result<Self, ConfigError> {
        let api_key = provider.resolve_api_key(endpoint)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: provider.base_url.as_str().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// GETs `path` and decodes the JSON body, honoring `deadline` as a hard
    /// per-attempt timeout. The resilience layer owns retries; this method
    /// performs exactly one request.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        deadline: Duration,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .timeout(deadline)
            .header("x-api-key", self.api_key.as_str())
            .header("x-correlation-id", CorrelationId::generate().0)
            .query(query)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()));
        }
        Err(match status.as_u16() {
            404 => ClientError::NotFound(path.to_string()),
            429 => ClientError::RateLimited,
            code if status.is_server_error() => ClientError::Upstream { status: code },
            code => ClientError::Rejected { status: code },
        })
    }
}
