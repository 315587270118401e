//! Etherscan-compatible explorers (Etherscan, BscScan, PolygonScan).
//!
//! All three share the `?module=account&action=balance` API and answer
//! `{"status":"1","result":"<wei>"}` on success.

use async_trait::async_trait;
use dumpsift_shared::ChainType;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::http::{RateLimitedClient, parse_amount};
use crate::provider::{Balance, BalanceProvider, ProviderError};

pub struct EtherscanLike {
    name: &'static str,
    chain: ChainType,
    base_url: String,
    api_key: Option<String>,
    client: RateLimitedClient,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

impl EtherscanLike {
    pub fn new(
        name: &'static str,
        chain: ChainType,
        http: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        requests_per_second: u32,
    ) -> Self {
        Self {
            name,
            chain,
            base_url: base_url.into(),
            api_key,
            client: RateLimitedClient::new(http, requests_per_second, name),
        }
    }
}

#[async_trait]
impl BalanceProvider for EtherscanLike {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports(&self, chain: ChainType) -> bool {
        chain == self.chain
    }

    #[instrument(skip_all, fields(provider = self.name, address = %address))]
    async fn balance(&self, chain: ChainType, address: &str) -> Result<Balance, ProviderError> {
        if !self.supports(chain) {
            return Err(ProviderError::Unsupported(chain));
        }
        let mut query = vec![
            ("module", "account"),
            ("action", "balance"),
            ("address", address),
            ("tag", "latest"),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.as_str()));
        }

        let reply: ApiReply = self.client.get_json(&self.base_url, &query).await?;
        if reply.status != "1" {
            let detail = reply.result.as_str().unwrap_or(&reply.message).to_string();
            if detail.to_ascii_lowercase().contains("rate limit") {
                return Err(ProviderError::RateLimited);
            }
            return Err(ProviderError::Unavailable(format!(
                "{}: {}",
                reply.message, detail
            )));
        }

        let raw = parse_amount(&reply.result)
            .ok_or_else(|| ProviderError::Unavailable("non-numeric result".into()))?;
        Ok(Balance::new(raw, chain))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::http::build_client;

    const ADDR: &str = "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe";

    fn bscscan(server: &MockServer, key: Option<&str>) -> EtherscanLike {
        let http = build_client(Duration::from_secs(5)).expect("client");
        EtherscanLike::new(
            "bscscan",
            ChainType::BinanceSmartChain,
            http,
            format!("{}/api", server.uri()),
            key.map(str::to_string),
            50,
        )
    }

    #[tokio::test]
    async fn reads_wei_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("module", "account"))
            .and(query_param("action", "balance"))
            .and(query_param("address", ADDR))
            .and(query_param("apikey", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1", "message": "OK", "result": "3000000000000000000"
            })))
            .mount(&server)
            .await;

        let b = bscscan(&server, Some("k"))
            .balance(ChainType::BinanceSmartChain, ADDR)
            .await
            .expect("balance");
        assert!((b.as_coins() - 3.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn status_zero_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("address", "limited"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "NOTOK", "result": "Max rate limit reached"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("address", "bad"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0", "message": "NOTOK", "result": "Error! Invalid address format"
            })))
            .mount(&server)
            .await;

        let p = bscscan(&server, None);
        assert_eq!(
            p.balance(ChainType::BinanceSmartChain, "limited").await,
            Err(ProviderError::RateLimited)
        );
        assert!(matches!(
            p.balance(ChainType::BinanceSmartChain, "bad").await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn only_serves_its_own_chain() {
        let server = MockServer::start().await;
        let result = bscscan(&server, None).balance(ChainType::Ethereum, ADDR).await;
        assert_eq!(result, Err(ProviderError::Unsupported(ChainType::Ethereum)));
    }
}
