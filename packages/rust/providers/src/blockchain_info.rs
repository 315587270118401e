//! blockchain.info: Bitcoin only, plain-text satoshi balance.

use async_trait::async_trait;
use dumpsift_shared::ChainType;
use reqwest::Client;
use tracing::instrument;

use crate::http::RateLimitedClient;
use crate::provider::{Balance, BalanceProvider, ProviderError};

pub struct BlockchainInfo {
    base_url: String,
    client: RateLimitedClient,
}

impl BlockchainInfo {
    pub fn new(http: Client, base_url: impl Into<String>, requests_per_second: u32) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: RateLimitedClient::new(http, requests_per_second, "blockchain_info"),
        }
    }
}

#[async_trait]
impl BalanceProvider for BlockchainInfo {
    fn name(&self) -> &'static str {
        "blockchain_info"
    }

    fn supports(&self, chain: ChainType) -> bool {
        chain == ChainType::Bitcoin
    }

    #[instrument(skip_all, fields(provider = "blockchain_info", address = %address))]
    async fn balance(&self, chain: ChainType, address: &str) -> Result<Balance, ProviderError> {
        if !self.supports(chain) {
            return Err(ProviderError::Unsupported(chain));
        }
        let url = format!("{}/q/addressbalance/{address}", self.base_url);
        let body = self
            .client
            .get(&url, &[])
            .await?
            .text()
            .await
            .map_err(ProviderError::from)?;

        let raw = body.trim().parse::<u128>().map_err(|_| {
            let snippet: String = body.chars().take(80).collect();
            ProviderError::Unavailable(format!("unexpected response: {snippet}"))
        })?;
        Ok(Balance::new(raw, chain))
    }
}
