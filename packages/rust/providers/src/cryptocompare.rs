//! CryptoCompare spot prices.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::instrument;

use crate::http::RateLimitedClient;
use crate::provider::{PriceProvider, ProviderError};

pub struct CryptoCompare {
    base_url: String,
    api_key: Option<String>,
    client: RateLimitedClient,
}

impl CryptoCompare {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        requests_per_second: u32,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: RateLimitedClient::new(http, requests_per_second, "cryptocompare"),
        }
    }
}

#[async_trait]
impl PriceProvider for CryptoCompare {
    fn name(&self) -> &'static str {
        "cryptocompare"
    }

    #[instrument(skip_all, fields(provider = "cryptocompare", symbol = %symbol))]
    async fn usd_price(&self, symbol: &str) -> Result<f64, ProviderError> {
        let url = format!("{}/data/price", self.base_url);
        let symbol = symbol.to_ascii_uppercase();
        let mut query = vec![("fsym", symbol.as_str()), ("tsyms", "USD")];
        if let Some(key) = &self.api_key {
            query.push(("api_key", key.as_str()));
        }

        let reply: Value = self.client.get_json(&url, &query).await?;
        if let Some(price) = reply.get("USD").and_then(Value::as_f64) {
            return Ok(price);
        }

        // Errors come back as 200 with {"Response":"Error","Message":...}.
        let message = reply
            .get("Message")
            .and_then(Value::as_str)
            .unwrap_or("no USD price in response");
        if message.to_ascii_lowercase().contains("rate limit") {
            Err(ProviderError::RateLimited)
        } else if message.contains("does not exist") {
            Err(ProviderError::NotFound)
        } else {
            Err(ProviderError::Unavailable(message.to_string()))
        }
    }
}
