//! Provider contracts shared by every balance and price source.

use async_trait::async_trait;
use dumpsift_shared::{ChainType, DumpsiftError};

/// Why a provider could not answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider knows nothing about this address. Treated as a zero balance.
    #[error("address not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out")]
    Timeout,

    #[error("chain {0} not supported by this provider")]
    Unsupported(ChainType),
}

impl From<ProviderError> for DumpsiftError {
    fn from(e: ProviderError) -> Self {
        DumpsiftError::Provider(e.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }
}

/// An on-chain balance in the chain's smallest unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub raw: u128,
    pub decimals: u32,
}

impl Balance {
    pub fn new(raw: u128, chain: ChainType) -> Self {
        Self {
            raw,
            decimals: chain.decimals(),
        }
    }

    pub fn zero(chain: ChainType) -> Self {
        Self::new(0, chain)
    }

    /// Balance in whole coins. Precision loss past f64 is accepted; the exact
    /// value is kept in `raw`.
    pub fn as_coins(&self) -> f64 {
        self.raw as f64 / 10f64.powi(self.decimals as i32)
    }

    pub fn is_positive(&self) -> bool {
        self.raw > 0
    }
}

/// Looks up the balance of an address on one or more chains.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, chain: ChainType) -> bool;

    async fn balance(&self, chain: ChainType, address: &str) -> Result<Balance, ProviderError>;
}

/// Looks up a USD spot price for a coin symbol (`BTC`, `ETH`, ...).
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn usd_price(&self, symbol: &str) -> Result<f64, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coins_use_chain_decimals() {
        let btc = Balance::new(150_000_000, ChainType::Bitcoin);
        assert!((btc.as_coins() - 1.5).abs() < 1e-12);

        let eth = Balance::new(2_500_000_000_000_000_000, ChainType::Ethereum);
        assert!((eth.as_coins() - 2.5).abs() < 1e-12);

        assert!(!Balance::zero(ChainType::Tron).is_positive());
    }
}
