//! External valuation sources for recovered wallets.
//!
//! Balance providers implement [`BalanceProvider`], price providers
//! [`PriceProvider`]. A [`ProviderSet`] holds the configured providers per
//! chain in fallback order and is what the enrichment loop consumes.

mod blockchain_info;
mod blockchair;
mod cache;
mod cryptocompare;
mod etherscan;
mod http;
mod provider;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dumpsift_shared::config::api_key_from_env;
use dumpsift_shared::{ChainType, DumpsiftError, ProvidersSection, Result};
use tracing::{debug, warn};

pub use blockchain_info::BlockchainInfo;
pub use blockchair::Blockchair;
pub use cache::TtlCache;
pub use cryptocompare::CryptoCompare;
pub use etherscan::EtherscanLike;
pub use http::build_client;
pub use provider::{Balance, BalanceProvider, PriceProvider, ProviderError};

/// Configured providers, per chain in fallback order, plus the price source.
#[derive(Clone, Default)]
pub struct ProviderSet {
    chains: BTreeMap<ChainType, Vec<Arc<dyn BalanceProvider>>>,
    price: Option<Arc<dyn PriceProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `provider` to the fallback list of `chain`.
    pub fn with_balance(mut self, chain: ChainType, provider: Arc<dyn BalanceProvider>) -> Self {
        self.chains.entry(chain).or_default().push(provider);
        self
    }

    pub fn with_price(mut self, provider: Arc<dyn PriceProvider>) -> Self {
        self.price = Some(provider);
        self
    }

    /// Build every provider named in `[providers]`.
    ///
    /// Unknown provider names, or providers that cannot serve the chain they
    /// are listed under, are configuration errors.
    pub fn from_config(config: &ProvidersSection, request_timeout: Duration) -> Result<Self> {
        config.validate()?;
        let http = build_client(request_timeout)?;
        let rps = config.requests_per_second;

        let mut registry: BTreeMap<&str, Arc<dyn BalanceProvider>> = BTreeMap::new();
        let mut set = Self::new();

        for (chain_key, names) in &config.chains {
            let chain: ChainType = chain_key
                .parse()
                .map_err(|e: String| DumpsiftError::config(e))?;

            for name in names {
                let provider = match registry.get(name.as_str()) {
                    Some(p) => Arc::clone(p),
                    None => {
                        let p = build_balance_provider(name, config, http.clone(), rps)?;
                        registry.insert(p.name(), Arc::clone(&p));
                        p
                    }
                };
                if !provider.supports(chain) {
                    return Err(DumpsiftError::config(format!(
                        "provider '{name}' cannot serve chain '{chain}'"
                    )));
                }
                set = set.with_balance(chain, provider);
            }
        }

        let price = CryptoCompare::new(
            http,
            &config.cryptocompare_url,
            api_key_from_env(&config.cryptocompare_api_key_env),
            rps,
        );
        set = set.with_price(Arc::new(price));

        debug!(chains = ?set.chains(), "providers configured");
        Ok(set)
    }

    /// Providers for `chain`, primary first. Empty when the chain is not enriched.
    pub fn providers_for(&self, chain: ChainType) -> &[Arc<dyn BalanceProvider>] {
        self.chains.get(&chain).map(Vec::as_slice).unwrap_or_default()
    }

    /// Chains with at least one provider.
    pub fn chains(&self) -> Vec<ChainType> {
        self.chains
            .iter()
            .filter(|(_, providers)| !providers.is_empty())
            .map(|(chain, _)| *chain)
            .collect()
    }

    pub fn price(&self) -> Option<&Arc<dyn PriceProvider>> {
        self.price.as_ref()
    }
}

fn build_balance_provider(
    name: &str,
    config: &ProvidersSection,
    http: reqwest::Client,
    rps: u32,
) -> Result<Arc<dyn BalanceProvider>> {
    let key = |var: &str| {
        let key = api_key_from_env(var);
        if key.is_none() {
            warn!(provider = name, env = var, "no API key set, using anonymous quota");
        }
        key
    };

    let provider: Arc<dyn BalanceProvider> = match name {
        "blockchain_info" => Arc::new(BlockchainInfo::new(http, &config.blockchain_info_url, rps)),
        "blockchair" => Arc::new(Blockchair::new(http, &config.blockchair_url, None, rps)),
        "etherscan" => Arc::new(EtherscanLike::new(
            "etherscan",
            ChainType::Ethereum,
            http,
            &config.etherscan_url,
            key(&config.etherscan_api_key_env),
            rps,
        )),
        "bscscan" => Arc::new(EtherscanLike::new(
            "bscscan",
            ChainType::BinanceSmartChain,
            http,
            &config.bscscan_url,
            key(&config.bscscan_api_key_env),
            rps,
        )),
        "polygonscan" => Arc::new(EtherscanLike::new(
            "polygonscan",
            ChainType::Polygon,
            http,
            &config.polygonscan_url,
            key(&config.polygonscan_api_key_env),
            rps,
        )),
        other => {
            return Err(DumpsiftError::config(format!(
                "unknown balance provider '{other}'"
            )));
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_fallback_chains() {
        let set = ProviderSet::from_config(&ProvidersSection::default(), Duration::from_secs(5))
            .expect("providers");

        let btc: Vec<&str> = set
            .providers_for(ChainType::Bitcoin)
            .iter()
            .map(|p| p.name())
            .collect();
        assert_eq!(btc, vec!["blockchain_info", "blockchair"]);
        assert!(set.providers_for(ChainType::Tron).is_empty());
        assert!(set.chains().contains(&ChainType::Polygon));
        assert!(set.price().is_some());
    }

    #[test]
    fn provider_chain_mismatch_is_rejected() {
        let mut config = ProvidersSection::default();
        config
            .chains
            .insert("bitcoin".into(), vec!["etherscan".into()]);
        let err = ProviderSet::from_config(&config, Duration::from_secs(5));
        assert!(err.is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = ProvidersSection::default();
        config.chains.insert("tron".into(), vec!["tronscan".into()]);
        assert!(ProviderSet::from_config(&config, Duration::from_secs(5)).is_err());
    }
}
