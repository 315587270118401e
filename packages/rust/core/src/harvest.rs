//! Run the entity parsers over one device's classified files.

use std::path::Path;

use dumpsift_extract::{DeviceGroup, FileRole};
use dumpsift_parsers::stealer::detect_from_name;
use dumpsift_parsers::{
    CardParser, CredentialParser, SoftwareParser, SystemInfoParser, WalletParser, parse_guarded,
};
use dumpsift_shared::{Card, Credential, SoftwareEntry, SystemProfile, WalletCandidate};
use dumpsift_storage::FileRow;
use tracing::{debug, warn};

/// A parsed record and the device-relative file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub record: T,
    pub source: String,
}

/// Everything the parsers recovered from one device, before dedup.
#[derive(Debug, Clone, Default)]
pub struct Harvest {
    pub profile: SystemProfile,
    pub credentials: Vec<Sourced<Credential>>,
    pub wallets: Vec<Sourced<WalletCandidate>>,
    pub cards: Vec<Sourced<Card>>,
    pub software: Vec<Sourced<SoftwareEntry>>,
    pub files: Vec<FileRow>,
}

fn sourced<'a, T: 'a>(records: Vec<T>, source: &'a str) -> impl Iterator<Item = Sourced<T>> + 'a {
    records.into_iter().map(move |record| Sourced {
        record,
        source: source.to_string(),
    })
}

/// Read every tagged file of `group` once and hand it to each parser whose
/// role it carries. Unreadable files are logged and skipped.
pub fn harvest_device(group: &DeviceGroup) -> Harvest {
    let mut harvest = Harvest::default();

    for file in &group.files {
        harvest.files.push(FileRow {
            rel_path: file.rel_path.clone(),
            size: file.size,
            roles: file
                .roles
                .iter()
                .map(|r| r.as_str())
                .collect::<Vec<_>>()
                .join(","),
        });
        if file.roles.is_empty() {
            continue;
        }

        let raw = match std::fs::read(&file.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "unreadable file skipped");
                continue;
            }
        };
        let path: &Path = &file.path;
        let source = file.rel_path.as_str();

        for role in &file.roles {
            match role {
                FileRole::Credential => harvest
                    .credentials
                    .extend(sourced(parse_guarded(&CredentialParser, &raw, path), source)),
                FileRole::System => {
                    for profile in parse_guarded(&SystemInfoParser, &raw, path) {
                        harvest.profile.merge(profile);
                    }
                }
                FileRole::Wallet => harvest
                    .wallets
                    .extend(sourced(parse_guarded(&WalletParser, &raw, path), source)),
                FileRole::Card => harvest
                    .cards
                    .extend(sourced(parse_guarded(&CardParser, &raw, path), source)),
                FileRole::Software => harvest
                    .software
                    .extend(sourced(parse_guarded(&SoftwareParser, &raw, path), source)),
            }
        }
    }

    if harvest.profile.stealer.is_none() {
        harvest.profile.stealer = std::iter::once(group.name.as_str())
            .chain(group.files.iter().map(|f| f.rel_path.as_str()))
            .find_map(detect_from_name)
            .map(str::to_string);
    }

    debug!(
        device = %group.name,
        credentials = harvest.credentials.len(),
        wallets = harvest.wallets.len(),
        cards = harvest.cards.len(),
        software = harvest.software.len(),
        "device parsed"
    );
    harvest
}

#[cfg(test)]
mod tests {
    use std::fs;

    use dumpsift_extract::classify;

    use super::*;

    #[test]
    fn parses_each_role_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = dir.path().join("US[ABC]");
        fs::create_dir_all(device.join("Wallets")).expect("mkdir");
        fs::write(
            device.join("Passwords.txt"),
            "URL: https://mail.example.com/login\nUsername: alice\nPassword: hunter2\n",
        )
        .expect("write");
        fs::write(
            device.join("System.txt"),
            "RedLine build\nComputer name: DESKTOP-1\nIP: 10.0.0.1\nCountry: US\n",
        )
        .expect("write");
        fs::write(
            device.join("Wallets").join("seed.txt"),
            "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe\n",
        )
        .expect("write");
        fs::write(device.join("notes.bin"), [0u8, 1, 2]).expect("write");

        let groups = classify(dir.path(), "logs.zip").expect("classify");
        assert_eq!(groups.len(), 1);
        let harvest = harvest_device(&groups[0]);

        assert_eq!(harvest.credentials.len(), 1);
        assert_eq!(harvest.credentials[0].source, "Passwords.txt");
        assert_eq!(harvest.wallets.len(), 1);
        assert_eq!(harvest.profile.hostname.as_deref(), Some("DESKTOP-1"));
        assert_eq!(harvest.profile.stealer.as_deref(), Some("RedLine"));
        assert_eq!(harvest.files.len(), 4);
    }

    #[test]
    fn stealer_falls_back_to_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let device = dir.path().join("Vidar_DE[XYZ]");
        fs::create_dir_all(&device).expect("mkdir");
        fs::write(device.join("passwords.txt"), "").expect("write");

        let groups = classify(dir.path(), "logs.zip").expect("classify");
        let harvest = harvest_device(&groups[0]);
        assert_eq!(harvest.profile.stealer.as_deref(), Some("Vidar"));
    }
}
