//! Identity keys, duplicate clustering, and secret sealing.
//!
//! Dedup is scoped to one device. Records are clustered by identity key in
//! encounter order: the first record of a cluster is canonical and counts its
//! duplicates, every later one points at it.

use std::collections::{BTreeMap, HashMap, HashSet};

use dumpsift_extract::DeviceGroup;
use dumpsift_shared::{Credential, DeviceId, SecretDigest, WalletCandidate, sha256_hex};
use dumpsift_storage::{
    CardRow, CredentialRow, DeviceBundle, DeviceCounts, DeviceRow, Identity, SoftwareRow,
    WalletRow,
};
use uuid::Uuid;

use crate::harvest::{Harvest, Sourced};

// ---------------------------------------------------------------------------
// Identity keys
// ---------------------------------------------------------------------------

/// SHA-256 over lower-cased trimmed domain, trimmed username, and password.
pub fn credential_key(cred: &Credential) -> String {
    let domain = cred
        .domain
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    sha256_hex(format!(
        "{domain}\u{1f}{}\u{1f}{}",
        cred.username.trim(),
        cred.password
    ))
}

/// `chain:address`, or `chain:digest` for wallets recovered without an
/// address. EVM addresses compare case-insensitively.
pub fn wallet_key(wallet: &WalletRow) -> String {
    let chain = wallet.chain.as_str();
    if let Some(address) = &wallet.address {
        let address = address.trim();
        if wallet.chain.is_evm() {
            return format!("{chain}:{}", address.to_lowercase());
        }
        return format!("{chain}:{address}");
    }
    let digest = wallet
        .mnemonic
        .as_ref()
        .or(wallet.private_key.as_ref())
        .or(wallet.password.as_ref())
        .map(SecretDigest::as_str)
        .unwrap_or_default();
    format!("{chain}:{digest}")
}

pub fn card_key(card: &CardRow) -> String {
    format!(
        "{}:{}:{}",
        card.masked_number,
        card.brand.as_str(),
        card.expiry.as_deref().unwrap_or_default()
    )
}

// ---------------------------------------------------------------------------
// Clustering
// ---------------------------------------------------------------------------

/// Assign a fresh id to every item and link duplicates to the first item
/// sharing their key.
pub fn cluster<T>(items: Vec<T>, key_of: impl Fn(&T) -> String) -> Vec<(String, T, Identity)> {
    let mut canonical: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<(String, T, Identity)> = Vec::with_capacity(items.len());

    for item in items {
        let key = key_of(&item);
        let id = Uuid::now_v7().to_string();
        let identity = match canonical.get(&key) {
            Some(&first) => {
                out[first].2.duplicate_count += 1;
                Identity {
                    key,
                    duplicate_of: Some(out[first].0.clone()),
                    duplicate_count: 0,
                }
            }
            None => {
                canonical.insert(key.clone(), out.len());
                Identity {
                    key,
                    duplicate_of: None,
                    duplicate_count: 0,
                }
            }
        };
        out.push((id, item, identity));
    }
    out
}

/// Replace plaintext wallet secrets with digests.
pub fn seal_wallet(candidate: WalletCandidate, source_path: String) -> WalletRow {
    WalletRow {
        id: String::new(),
        chain: candidate.chain_or_unknown(),
        address: candidate.address,
        mnemonic: candidate.mnemonic.as_deref().map(SecretDigest::of),
        private_key: candidate.private_key.as_deref().map(SecretDigest::of),
        password: candidate.password.as_deref().map(SecretDigest::of),
        derivation_path: candidate.derivation_path,
        label: candidate.label,
        source_path,
        identity: Identity::default(),
    }
}

/// Password frequencies, most common first.
pub fn password_stats<'a>(passwords: impl Iterator<Item = &'a str>) -> Vec<(String, u32)> {
    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    for password in passwords.filter(|p| !p.is_empty()) {
        *counts.entry(password).or_default() += 1;
    }
    let mut stats: Vec<(String, u32)> = counts
        .into_iter()
        .map(|(p, n)| (p.to_string(), n))
        .collect();
    stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    stats
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Turn one device's harvest into the rows committed for it.
pub fn build_bundle(
    archive_name: &str,
    upload_id: Option<&str>,
    group: &DeviceGroup,
    harvest: Harvest,
) -> DeviceBundle {
    let Harvest {
        mut profile,
        credentials,
        wallets,
        cards,
        software,
        files,
    } = harvest;
    let stealer = profile.stealer.clone();

    let stats = password_stats(credentials.iter().map(|c| c.record.password.as_str()));

    let credentials: Vec<CredentialRow> = cluster(credentials, |c| credential_key(&c.record))
        .into_iter()
        .map(|(id, Sourced { record, source }, identity)| CredentialRow {
            id,
            url: record.url,
            domain: record.domain,
            tld: record.tld,
            username: record.username,
            password: record.password,
            browser: record.browser,
            stealer: stealer.clone(),
            source_path: source,
            identity,
        })
        .collect();

    let sealed: Vec<WalletRow> = wallets
        .into_iter()
        .map(|w| seal_wallet(w.record, w.source))
        .collect();
    let wallets: Vec<WalletRow> = cluster(sealed, wallet_key)
        .into_iter()
        .map(|(id, row, identity)| WalletRow { id, identity, ..row })
        .collect();

    let cards: Vec<CardRow> = cards
        .into_iter()
        .map(|Sourced { record, source }| CardRow {
            id: String::new(),
            masked_number: record.masked_number,
            brand: record.brand,
            expiry: record.expiry,
            holder: record.holder,
            source_path: source,
            identity: Identity::default(),
        })
        .collect();
    let cards: Vec<CardRow> = cluster(cards, card_key)
        .into_iter()
        .map(|(id, row, identity)| CardRow { id, identity, ..row })
        .collect();

    let mut seen_software = HashSet::new();
    let software: Vec<SoftwareRow> = software
        .into_iter()
        .filter(|s| seen_software.insert(s.record.clone()))
        .map(|Sourced { record, source }| SoftwareRow {
            name: record.name,
            version: record.version,
            source_path: source,
        })
        .collect();

    let mut seen_entries = HashSet::new();
    let system_info: Vec<(String, String)> = std::mem::take(&mut profile.entries)
        .into_iter()
        .filter(|entry| seen_entries.insert(entry.clone()))
        .collect();

    let domains: HashSet<String> = credentials
        .iter()
        .filter_map(|c| c.domain.as_deref())
        .map(|d| d.trim().to_lowercase())
        .collect();
    let urls: HashSet<&str> = credentials.iter().filter_map(|c| c.url.as_deref()).collect();
    let counts = DeviceCounts {
        credentials: credentials.len() as u32,
        files: files.len() as u32,
        domains: domains.len() as u32,
        urls: urls.len() as u32,
        wallets: wallets.len() as u32,
        cards: cards.len() as u32,
        software: software.len() as u32,
    };

    DeviceBundle {
        device: DeviceRow {
            id: DeviceId::derive(archive_name, &group.name),
            name: group.name.clone(),
            archive_name: archive_name.to_string(),
            upload_id: upload_id.map(str::to_string),
            profile,
            counts,
        },
        credentials,
        wallets,
        cards,
        system_info,
        software,
        files,
        password_stats: stats,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use dumpsift_shared::{Card, CardBrand, ChainType, SoftwareEntry};

    use super::*;

    fn cred(domain: &str, user: &str, pass: &str) -> Sourced<Credential> {
        Sourced {
            record: Credential {
                url: Some(format!("https://{domain}/")),
                domain: Some(domain.to_string()),
                tld: None,
                username: user.to_string(),
                password: pass.to_string(),
                browser: None,
            },
            source: "Passwords.txt".into(),
        }
    }

    fn group() -> DeviceGroup {
        DeviceGroup {
            name: "US[ABC]".into(),
            root: PathBuf::from("/tmp/x/US[ABC]"),
            rel_root: PathBuf::from("US[ABC]"),
            files: Vec::new(),
        }
    }

    #[test]
    fn credential_key_normalizes_domain_and_username() {
        let a = cred(" Example.COM ", " alice ", "pw").record;
        let b = cred("example.com", "alice", "pw").record;
        let c = cred("example.com", "alice", "PW").record;
        assert_eq!(credential_key(&a), credential_key(&b));
        assert_ne!(credential_key(&a), credential_key(&c));
    }

    #[test]
    fn duplicates_point_at_first_record() {
        let clustered = cluster(vec!["a", "b", "a", "a"], |s| s.to_string());
        let first = &clustered[0];
        assert!(first.2.is_canonical());
        assert_eq!(first.2.duplicate_count, 2);
        assert_eq!(clustered[2].2.duplicate_of.as_deref(), Some(first.0.as_str()));
        assert_eq!(clustered[3].2.duplicate_of.as_deref(), Some(first.0.as_str()));
        assert!(clustered[1].2.is_canonical());
        assert_eq!(clustered[1].2.duplicate_count, 0);
    }

    #[test]
    fn evm_addresses_compare_case_insensitively() {
        let upper = seal_wallet(
            WalletCandidate {
                chain: Some(ChainType::Ethereum),
                address: Some("0xDE0B295669A9FD93D5F28D9EC85E40F4CB697BAE".into()),
                ..Default::default()
            },
            "a.txt".into(),
        );
        let lower = seal_wallet(
            WalletCandidate {
                chain: Some(ChainType::Ethereum),
                address: Some("0xde0b295669a9fd93d5f28d9ec85e40f4cb697bae".into()),
                ..Default::default()
            },
            "b.txt".into(),
        );
        assert_eq!(wallet_key(&upper), wallet_key(&lower));
    }

    #[test]
    fn secrets_are_sealed_and_keyed_by_digest() {
        let phrase = "abandon ability able about above absent absorb abstract absurd abuse access accident";
        let row = seal_wallet(
            WalletCandidate {
                mnemonic: Some(phrase.into()),
                password: Some("hunter2".into()),
                ..Default::default()
            },
            "seed.txt".into(),
        );
        let digest = row.mnemonic.as_ref().expect("sealed");
        assert_eq!(digest.as_str().len(), 64);
        assert_ne!(digest.as_str(), phrase);
        assert_eq!(row.password.as_ref().map(|d| d.as_str().len()), Some(64));
        assert_eq!(wallet_key(&row), format!("unknown:{}", digest.as_str()));
    }

    #[test]
    fn password_stats_are_sorted_by_frequency() {
        let stats = password_stats(["b", "a", "b", "", "c", "b", "a"].into_iter());
        assert_eq!(
            stats,
            vec![("b".into(), 3), ("a".into(), 2), ("c".into(), 1)]
        );
    }

    #[test]
    fn bundle_counts_and_dedup() {
        let harvest = Harvest {
            credentials: vec![
                cred("example.com", "alice", "pw"),
                cred("EXAMPLE.com", "alice", "pw"),
                cred("other.org", "bob", "pw"),
            ],
            cards: vec![
                Sourced {
                    record: Card {
                        masked_number: "************1111".into(),
                        brand: CardBrand::Visa,
                        expiry: Some("12/30".into()),
                        holder: None,
                    },
                    source: "CC/cards.txt".into(),
                };
                2
            ],
            software: vec![
                Sourced {
                    record: SoftwareEntry {
                        name: "7-Zip".into(),
                        version: Some("23.01".into()),
                    },
                    source: "Software.txt".into(),
                };
                2
            ],
            ..Default::default()
        };
        let bundle = build_bundle("logs.zip", Some("up-1"), &group(), harvest);

        assert_eq!(bundle.device.id, DeviceId::derive("logs.zip", "US[ABC]"));
        assert_eq!(bundle.device.upload_id.as_deref(), Some("up-1"));
        assert_eq!(bundle.credentials.len(), 3);
        assert_eq!(
            bundle.credentials.iter().filter(|c| c.identity.is_canonical()).count(),
            2
        );
        assert_eq!(bundle.cards.len(), 2);
        assert_eq!(bundle.cards[0].identity.duplicate_count, 1);
        assert_eq!(bundle.software.len(), 1);
        assert_eq!(bundle.device.counts.domains, 2);
        assert_eq!(bundle.device.counts.urls, 3);
        assert_eq!(bundle.password_stats, vec![("pw".into(), 3)]);
    }
}
