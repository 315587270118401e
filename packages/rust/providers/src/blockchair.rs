//! Blockchair address dashboards: Bitcoin, Ethereum, Litecoin, Dogecoin.

use async_trait::async_trait;
use dumpsift_shared::ChainType;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::http::{RateLimitedClient, parse_amount};
use crate::provider::{Balance, BalanceProvider, ProviderError};

pub struct Blockchair {
    base_url: String,
    api_key: Option<String>,
    client: RateLimitedClient,
}

#[derive(Debug, Deserialize)]
struct Dashboard {
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

impl Blockchair {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        requests_per_second: u32,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: RateLimitedClient::new(http, requests_per_second, "blockchair"),
        }
    }

    fn slug(chain: ChainType) -> Option<&'static str> {
        match chain {
            ChainType::Bitcoin => Some("bitcoin"),
            ChainType::Ethereum => Some("ethereum"),
            ChainType::Litecoin => Some("litecoin"),
            ChainType::Dogecoin => Some("dogecoin"),
            _ => None,
        }
    }
}

#[async_trait]
impl BalanceProvider for Blockchair {
    fn name(&self) -> &'static str {
        "blockchair"
    }

    fn supports(&self, chain: ChainType) -> bool {
        Self::slug(chain).is_some()
    }

    #[instrument(skip_all, fields(provider = "blockchair", chain = %chain, address = %address))]
    async fn balance(&self, chain: ChainType, address: &str) -> Result<Balance, ProviderError> {
        let slug = Self::slug(chain).ok_or(ProviderError::Unsupported(chain))?;
        let url = format!("{}/{slug}/dashboards/address/{address}", self.base_url);
        let mut query = Vec::new();
        if let Some(key) = &self.api_key {
            query.push(("key", key.as_str()));
        }

        let dashboard: Dashboard = self.client.get_json(&url, &query).await?;

        // EVM addresses come back lower-cased.
        let entry = dashboard
            .data
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(address))
            .map(|(_, v)| v)
            .ok_or(ProviderError::NotFound)?;

        let raw = entry
            .pointer("/address/balance")
            .and_then(parse_amount)
            .ok_or_else(|| ProviderError::Unavailable("missing address.balance".into()))?;
        Ok(Balance::new(raw, chain))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::build_client;

    fn provider(server: &MockServer, key: Option<&str>) -> Blockchair {
        let http = build_client(Duration::from_secs(5)).expect("client");
        Blockchair::new(http, server.uri(), key.map(str::to_string), 50)
    }

    #[tokio::test]
    async fn reads_numeric_balance() {
        let server = MockServer::start().await;
        let addr = "LM2WMpR1Rp6j3Sa59cMXMs1SPzj9eXpGc1";
        Mock::given(method("GET"))
            .and(path(format!("/litecoin/dashboards/address/{addr}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { addr: { "address": { "balance": 250_000_000u64 } } }
            })))
            .mount(&server)
            .await;

        let b = provider(&server, None)
            .balance(ChainType::Litecoin, addr)
            .await
            .expect("balance");
        assert_eq!(b.raw, 250_000_000);
        assert_eq!(b.decimals, 8);
    }

    #[tokio::test]
    async fn reads_string_wei_with_case_mismatch() {
        let server = MockServer::start().await;
        let addr = "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe";
        Mock::given(method("GET"))
            .and(path(format!("/ethereum/dashboards/address/{addr}")))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { addr.to_lowercase(): { "address": { "balance": "1000000000000000000" } } }
            })))
            .mount(&server)
            .await;

        let b = provider(&server, Some("secret"))
            .balance(ChainType::Ethereum, addr)
            .await
            .expect("balance");
        assert!((b.as_coins() - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn empty_data_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        // `data: []` does not deserialize into a map; that is a provider fault.
        let result = provider(&server, None)
            .balance(ChainType::Dogecoin, "DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L")
            .await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .mount(&server)
            .await;
        let result = provider(&server, None)
            .balance(ChainType::Dogecoin, "DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L")
            .await;
        assert_eq!(result, Err(ProviderError::NotFound));
    }
}
