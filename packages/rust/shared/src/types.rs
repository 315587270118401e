//! Core domain types shared by the parsers, storage, and pipeline crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_ref());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// DeviceId
// ---------------------------------------------------------------------------

/// Stable device identifier: `dev_` + SHA-256 of `<archive name>/<device dir>`.
///
/// The same archive re-ingested under the same file name yields the same ids,
/// which is what makes re-ingest a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn derive(archive_name: &str, device_dir: &str) -> Self {
        Self(format!("dev_{}", sha256_hex(format!("{archive_name}/{device_dir}"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SecretDigest
// ---------------------------------------------------------------------------

/// One-way digest of secret wallet material.
///
/// The only way to build one is by hashing, so a value of this type can never
/// carry plaintext into storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretDigest(String);

impl SecretDigest {
    /// Hash a secret after trimming surrounding whitespace.
    pub fn of(secret: &str) -> Self {
        Self(sha256_hex(secret.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ChainType
// ---------------------------------------------------------------------------

/// Blockchain a wallet address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainType {
    Bitcoin,
    Ethereum,
    BinanceSmartChain,
    Polygon,
    Litecoin,
    Dogecoin,
    Tron,
    Solana,
    Unknown,
}

impl ChainType {
    pub const ALL: [ChainType; 9] = [
        Self::Bitcoin,
        Self::Ethereum,
        Self::BinanceSmartChain,
        Self::Polygon,
        Self::Litecoin,
        Self::Dogecoin,
        Self::Tron,
        Self::Solana,
        Self::Unknown,
    ];

    /// Ticker symbol, used as the price cache key.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Bitcoin => "BTC",
            Self::Ethereum => "ETH",
            Self::BinanceSmartChain => "BNB",
            Self::Polygon => "MATIC",
            Self::Litecoin => "LTC",
            Self::Dogecoin => "DOGE",
            Self::Tron => "TRX",
            Self::Solana => "SOL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Config/storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ethereum",
            Self::BinanceSmartChain => "bsc",
            Self::Polygon => "polygon",
            Self::Litecoin => "litecoin",
            Self::Dogecoin => "dogecoin",
            Self::Tron => "tron",
            Self::Solana => "solana",
            Self::Unknown => "unknown",
        }
    }

    /// Number of decimals of the smallest on-chain unit.
    pub fn decimals(&self) -> u32 {
        match self {
            Self::Bitcoin | Self::Litecoin | Self::Dogecoin => 8,
            Self::Ethereum | Self::BinanceSmartChain | Self::Polygon => 18,
            Self::Tron => 6,
            Self::Solana => 9,
            Self::Unknown => 0,
        }
    }

    pub fn is_evm(&self) -> bool {
        matches!(
            self,
            Self::Ethereum | Self::BinanceSmartChain | Self::Polygon
        )
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainType {
    type Err = String;

    /// Accepts config keys, ticker symbols, and common wallet-export spellings.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let chain = match s.trim().to_ascii_lowercase().as_str() {
            "bitcoin" | "btc" => Self::Bitcoin,
            "ethereum" | "eth" | "erc20" => Self::Ethereum,
            "bsc" | "bnb" | "binance" | "binance smart chain" | "bep20" => {
                Self::BinanceSmartChain
            }
            "polygon" | "matic" => Self::Polygon,
            "litecoin" | "ltc" => Self::Litecoin,
            "dogecoin" | "doge" => Self::Dogecoin,
            "tron" | "trx" | "trc20" => Self::Tron,
            "solana" | "sol" => Self::Solana,
            "unknown" => Self::Unknown,
            other => return Err(format!("unknown chain '{other}'")),
        };
        Ok(chain)
    }
}

// ---------------------------------------------------------------------------
// CardBrand
// ---------------------------------------------------------------------------

/// Payment card network, decided by IIN prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardBrand {
    Visa,
    VisaElectron,
    Mastercard,
    Amex,
    Discover,
    Jcb,
    DinersClub,
    UnionPay,
    Maestro,
    Mir,
    Unknown,
}

impl CardBrand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visa => "visa",
            Self::VisaElectron => "visa_electron",
            Self::Mastercard => "mastercard",
            Self::Amex => "amex",
            Self::Discover => "discover",
            Self::Jcb => "jcb",
            Self::DinersClub => "diners_club",
            Self::UnionPay => "unionpay",
            Self::Maestro => "maestro",
            Self::Mir => "mir",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CardBrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parser output records
// ---------------------------------------------------------------------------

/// A login recovered from a browser password dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub url: Option<String>,
    pub domain: Option<String>,
    pub tld: Option<String>,
    pub username: String,
    pub password: String,
    pub browser: Option<String>,
}

/// Wallet material as found in the dump. Secrets are still plaintext here;
/// they are sealed into digests before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletCandidate {
    pub chain: Option<ChainType>,
    pub address: Option<String>,
    pub mnemonic: Option<String>,
    pub private_key: Option<String>,
    pub password: Option<String>,
    pub derivation_path: Option<String>,
    /// Wallet software named in the export (MetaMask, Exodus, ...).
    pub label: Option<String>,
}

impl WalletCandidate {
    pub fn chain_or_unknown(&self) -> ChainType {
        self.chain.unwrap_or(ChainType::Unknown)
    }

    pub fn has_material(&self) -> bool {
        self.address.is_some() || self.mnemonic.is_some() || self.private_key.is_some()
    }
}

/// A payment card. The full number never leaves the parser; only the mask does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub masked_number: String,
    pub brand: CardBrand,
    pub expiry: Option<String>,
    pub holder: Option<String>,
}

/// Host metadata from a stealer's system report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemProfile {
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub os: Option<String>,
    pub username: Option<String>,
    pub language: Option<String>,
    pub antivirus: Option<String>,
    pub hwid: Option<String>,
    pub infected_at: Option<String>,
    pub stealer: Option<String>,
    /// Every key/value pair seen, in file order.
    pub entries: Vec<(String, String)>,
}

impl SystemProfile {
    /// Fill fields that are still empty from `other`, and append its entries.
    pub fn merge(&mut self, other: SystemProfile) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value;
            }
        }
        fill(&mut self.hostname, other.hostname);
        fill(&mut self.ip, other.ip);
        fill(&mut self.country, other.country);
        fill(&mut self.os, other.os);
        fill(&mut self.username, other.username);
        fill(&mut self.language, other.language);
        fill(&mut self.antivirus, other.antivirus);
        fill(&mut self.hwid, other.hwid);
        fill(&mut self.infected_at, other.infected_at);
        fill(&mut self.stealer, other.stealer);
        self.entries.extend(other.entries);
    }
}

/// An installed program listed by the stealer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoftwareEntry {
    pub name: String,
    pub version: Option<String>,
}
