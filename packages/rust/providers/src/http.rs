//! HTTP plumbing shared by the REST providers: one client, one rate limiter
//! per provider, and status-code mapping into [`ProviderError`].

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::provider::ProviderError;

const USER_AGENT: &str = concat!("dumpsift/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client with the provider defaults.
pub fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))
}

/// A client plus the provider's own request quota.
pub(crate) struct RateLimitedClient {
    http: Client,
    limiter: DefaultDirectRateLimiter,
    provider: &'static str,
}

impl RateLimitedClient {
    pub(crate) fn new(http: Client, requests_per_second: u32, provider: &'static str) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rps).allow_burst(rps);
        Self {
            http,
            limiter: RateLimiter::direct(quota),
            provider,
        }
    }

    /// GET `url` with `query`, waiting for the rate limiter first.
    pub(crate) async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Response, ProviderError> {
        self.limiter.until_ready().await;
        debug!(provider = self.provider, url, "provider request");

        let response = self.http.get(url).query(query).send().await?;
        check_status(response).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        let response = self.get(url, query).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{}: bad JSON: {e}", self.provider)))
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
        StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Err(ProviderError::Timeout),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            Err(ProviderError::Unavailable(format!("HTTP {status}: {snippet}")))
        }
    }
}

/// Parse an integer amount that may arrive as a JSON number or a string.
pub(crate) fn parse_amount(value: &serde_json::Value) -> Option<u128> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u128)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
