//! Crypto wallet parser.
//!
//! Reads structured wallet exports (`Mnemonic: ...`, `Address: ...`) first and
//! falls back to scanning free text for addresses, private keys and seed
//! phrases. The chain is inferred from the address shape; a declared
//! `Type:`/`Coin:` field only disambiguates within the EVM family.

use std::collections::HashSet;
use std::sync::LazyLock;

use dumpsift_shared::{ChainType, WalletCandidate};
use regex::Regex;

use crate::EntityParser;
use crate::text::{decode, field, non_empty, read_blocks};

const MNEMONIC_KEYS: &[&str] = &[
    "mnemonic",
    "seed",
    "seed phrase",
    "phrase",
    "recovery phrase",
    "secret phrase",
    "mnemonic phrase",
    "words",
];
const KEY_KEYS: &[&str] = &["private key", "privatekey", "private", "key", "priv", "secret key"];
const ADDRESS_KEYS: &[&str] = &["address", "wallet", "wallet address", "addr", "public address", "account"];
const PASSWORD_KEYS: &[&str] = &["password", "pass", "wallet password"];
const CHAIN_KEYS: &[&str] = &["type", "coin", "chain", "network", "currency"];
const PATH_KEYS: &[&str] = &["path", "derivation path"];
const LABEL_KEYS: &[&str] = &["wallet name", "extension", "application", "app"];

/// BIP-39 phrase lengths.
const MNEMONIC_LENGTHS: &[usize] = &[12, 15, 18, 21, 24];

const BASE58: &str = "1-9A-HJ-NP-Za-km-z";

static BTC_LEGACY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^[13][{BASE58}]{{25,34}}$")).expect("valid regex"));
static BTC_BECH32: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^bc1[ac-hj-np-z02-9]{39,59}$").expect("valid regex"));
static EVM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^0x[a-fA-F0-9]{40}$").expect("valid regex"));
static LTC_LEGACY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^[LM][{BASE58}]{{26,33}}$")).expect("valid regex"));
static LTC_BECH32: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^ltc1[ac-hj-np-z02-9]{39,59}$").expect("valid regex"));
static DOGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^D[5-9A-HJ-NP-U][{BASE58}]{{32}}$")).expect("valid regex"));
static TRON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^T[{BASE58}]{{33}}$")).expect("valid regex"));
static SOLANA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^[{BASE58}]{{32,44}}$")).expect("valid regex"));
static WIF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^(?:5[{BASE58}]{{50}}|[KL][{BASE58}]{{51}})$")).expect("valid regex")
});

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// Chain implied by an address's shape. Solana is never inferred: its
/// base58 shape collides with too much noise.
pub fn chain_from_address(address: &str) -> Option<ChainType> {
    let a = address.trim();
    if EVM.is_match(a) {
        Some(ChainType::Ethereum)
    } else if BTC_BECH32.is_match(a) || BTC_LEGACY.is_match(a) {
        Some(ChainType::Bitcoin)
    } else if LTC_BECH32.is_match(a) || LTC_LEGACY.is_match(a) {
        Some(ChainType::Litecoin)
    } else if DOGE.is_match(a) {
        Some(ChainType::Dogecoin)
    } else if TRON.is_match(a) {
        Some(ChainType::Tron)
    } else {
        None
    }
}

/// Normalize a seed phrase: drop numbering (`1.`, `2)`), lowercase, single
/// spaces. `None` unless the result is a plausible BIP-39 phrase.
pub fn normalize_mnemonic(raw: &str) -> Option<String> {
    let words: Vec<String> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .filter(|w| !w.trim_end_matches(['.', ')']).chars().all(|c| c.is_ascii_digit()))
        .map(str::to_ascii_lowercase)
        .collect();

    let plausible = MNEMONIC_LENGTHS.contains(&words.len())
        && words
            .iter()
            .all(|w| (3..=8).contains(&w.len()) && w.chars().all(|c| c.is_ascii_lowercase()));
    plausible.then(|| words.join(" "))
}

pub fn is_valid_mnemonic(raw: &str) -> bool {
    normalize_mnemonic(raw).is_some()
}

/// 64 hex characters, optionally `0x`-prefixed.
pub fn is_hex_private_key(raw: &str) -> bool {
    let s = raw.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Bitcoin wallet import format, compressed or not.
pub fn is_wif(raw: &str) -> bool {
    WIF.is_match(raw.trim())
}

pub fn is_private_key(raw: &str) -> bool {
    is_hex_private_key(raw) || is_wif(raw)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parses wallet files into [`WalletCandidate`] records.
pub struct WalletParser;

impl EntityParser for WalletParser {
    type Record = WalletCandidate;

    fn name(&self) -> &'static str {
        "wallet"
    }

    fn parse(&self, raw: &[u8]) -> Vec<WalletCandidate> {
        let text = decode(raw);
        let structured: Vec<WalletCandidate> = read_blocks(&text)
            .iter()
            .filter_map(|block| from_block(block))
            .collect();
        if !structured.is_empty() {
            return structured;
        }
        scan(&text)
    }
}

fn from_block(block: &[(String, &str)]) -> Option<WalletCandidate> {
    let declared = field(block, CHAIN_KEYS).and_then(|v| v.parse::<ChainType>().ok());
    let raw_address = field(block, ADDRESS_KEYS);

    let mut label = field(block, LABEL_KEYS).and_then(non_empty);
    let (address, shape_chain) = match raw_address {
        Some(a) => match chain_from_address(a) {
            Some(chain) => (Some(a.to_string()), Some(chain)),
            None if declared == Some(ChainType::Solana) && SOLANA.is_match(a) => {
                (Some(a.to_string()), Some(ChainType::Solana))
            }
            None => {
                // `Wallet: Exodus` names the wallet rather than holding an address.
                if label.is_none() {
                    label = non_empty(a);
                }
                (None, None)
            }
        },
        None => (None, None),
    };

    let mnemonic = field(block, MNEMONIC_KEYS).and_then(normalize_mnemonic);
    let private_key = field(block, KEY_KEYS)
        .filter(|k| is_private_key(k))
        .map(str::to_string);

    let chain = match (shape_chain, declared) {
        (Some(shape), Some(d)) if shape.is_evm() && d.is_evm() => Some(d),
        (Some(shape), _) => Some(shape),
        (None, _) if private_key.as_deref().is_some_and(is_wif) => Some(ChainType::Bitcoin),
        (None, d) => d,
    };

    let candidate = WalletCandidate {
        chain,
        address,
        mnemonic,
        private_key,
        password: field(block, PASSWORD_KEYS).and_then(non_empty),
        derivation_path: field(block, PATH_KEYS).and_then(non_empty),
        label,
    };
    candidate.has_material().then_some(candidate)
}

/// Free-text fallback: one candidate per distinct phrase, key or address.
fn scan(text: &str) -> Vec<WalletCandidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for line in text.lines() {
        if let Some(phrase) = normalize_mnemonic(line) {
            if seen.insert(phrase.clone()) {
                out.push(WalletCandidate {
                    mnemonic: Some(phrase),
                    ..Default::default()
                });
            }
        }
    }

    for token in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        if token.len() < 26 || !seen.insert(token.to_string()) {
            continue;
        }
        if is_hex_private_key(token) {
            out.push(WalletCandidate {
                private_key: Some(token.to_string()),
                ..Default::default()
            });
        } else if is_wif(token) {
            out.push(WalletCandidate {
                chain: Some(ChainType::Bitcoin),
                private_key: Some(token.to_string()),
                ..Default::default()
            });
        } else if let Some(chain) = chain_from_address(token) {
            out.push(WalletCandidate {
                chain: Some(chain),
                address: Some(token.to_string()),
                ..Default::default()
            });
        }
    }
    out
}
