//! Group an extracted tree into devices and tag files for the parsers.
//!
//! Each top-level directory is one device. Files lying directly in the root
//! form a device named after the archive. A root holding a single directory
//! that itself contains only directories is a wrapper (`Logs/US[...]/...`)
//! and is descended into.
//!
//! Roles come from file and directory names only; content is never read
//! here. A file can carry several roles, and the parsers decide whether it
//! really holds anything.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::detect::archive_stem;

/// Which parser a file is a candidate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileRole {
    Credential,
    System,
    Wallet,
    Card,
    Software,
}

impl FileRole {
    pub const ALL: [FileRole; 5] = [
        Self::Credential,
        Self::System,
        Self::Wallet,
        Self::Card,
        Self::Software,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::System => "system",
            Self::Wallet => "wallet",
            Self::Card => "card",
            Self::Software => "software",
        }
    }

    /// The match rule for this role. `name` is the lower-cased file name,
    /// `dirs` the lower-cased directory names between the device root and
    /// the file.
    fn matches(self, name: &str, dirs: &[String]) -> bool {
        let stem = name.rsplit_once('.').map_or(name, |(s, _)| s);
        match self {
            Self::Credential => {
                CREDENTIAL_NAMES.contains(&name)
                    || (name.ends_with(".txt") && contains_any(stem, CREDENTIAL_KEYWORDS))
            }
            Self::System => {
                SYSTEM_NAMES.contains(&name)
                    || (name.ends_with(".txt") && contains_any(stem, SYSTEM_KEYWORDS))
            }
            Self::Wallet => {
                WALLET_NAMES.contains(&name)
                    || contains_any(stem, WALLET_KEYWORDS)
                    || dirs.iter().any(|d| d == "wallets" || d == "wallet")
            }
            Self::Card => {
                tokens(stem).any(|t| CARD_TOKENS.contains(&t))
                    || dirs.iter().any(|d| CARD_DIRS.contains(&d.as_str()))
            }
            Self::Software => {
                SOFTWARE_NAMES.contains(&name)
                    || (name.ends_with(".txt") && contains_any(stem, SOFTWARE_KEYWORDS))
            }
        }
    }
}

const CREDENTIAL_NAMES: &[&str] = &[
    "all passwords.txt",
    "all_passwords.txt",
    "passwords.txt",
    "allpasswords_list.txt",
    "_allpasswords_list.txt",
    "password.txt",
    "pass.txt",
    "all_pass.txt",
    "all pass.txt",
    "password_list.txt",
    "passlist.txt",
    "creds.txt",
];
const CREDENTIAL_KEYWORDS: &[&str] = &["password", "pass", "login", "creds", "credential", "account"];

const SYSTEM_NAMES: &[&str] = &[
    "system.txt",
    "systeminfo.txt",
    "information.txt",
    "userinformation.txt",
    "user_information.txt",
    "info.txt",
];
const SYSTEM_KEYWORDS: &[&str] = &["systeminfo", "system_info", "information"];

const WALLET_NAMES: &[&str] = &[
    "mnemonic.txt",
    "seed.txt",
    "wallet.txt",
    "metamask.txt",
    "exodus.txt",
    "electrum.txt",
    "wallet_cracked.txt",
    "walletaddress.txt",
    "privatekey.txt",
];
const WALLET_KEYWORDS: &[&str] = &["wallet", "mnemonic", "seed", "private"];

const CARD_TOKENS: &[&str] = &["cc", "ccs", "card", "cards", "creditcard", "creditcards"];
const CARD_DIRS: &[&str] = &["cc", "ccs", "cards", "creditcards", "credit cards"];

const SOFTWARE_NAMES: &[&str] = &[
    "installedsoftware.txt",
    "installed_software.txt",
    "installedprograms.txt",
    "installed_programs.txt",
    "software.txt",
    "programs.txt",
];
const SOFTWARE_KEYWORDS: &[&str] = &["software", "programs"];

/// Subdirectories stealers create inside a device folder.
const SECTION_DIRS: &[&str] = &[
    "autofill",
    "autofills",
    "browsers",
    "cookies",
    "crypto",
    "discord",
    "filegrabber",
    "files",
    "ftp",
    "grabber",
    "history",
    "messengers",
    "passwords",
    "screenshots",
    "steam",
    "telegram",
    "vpn",
    "wallet",
    "wallets",
];

/// Extensions a parser may reasonably read. Binary browser databases and
/// grabbed documents are inventoried but never parsed.
const TEXT_EXTENSIONS: &[&str] = &["txt", "log", "json", "csv", "ini", "dat"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

fn tokens(stem: &str) -> impl Iterator<Item = &str> {
    stem.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

fn is_text_like(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => TEXT_EXTENSIONS.contains(&ext),
        None => true,
    }
}

/// Roles for a file at `rel` (relative to its device root).
pub fn roles_for(rel: &Path) -> Vec<FileRole> {
    let Some(name) = rel.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return Vec::new();
    };
    if !is_text_like(&name) {
        return Vec::new();
    }
    let dirs: Vec<String> = rel
        .parent()
        .into_iter()
        .flat_map(|p| p.iter())
        .map(|d| d.to_string_lossy().to_lowercase())
        .collect();

    FileRole::ALL
        .into_iter()
        .filter(|role| role.matches(&name, &dirs))
        .collect()
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// One file inside a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFile {
    pub path: PathBuf,
    /// Path relative to the device root, `/`-separated.
    pub rel_path: String,
    pub size: u64,
    pub roles: Vec<FileRole>,
}

impl ClassifiedFile {
    pub fn has_role(&self, role: FileRole) -> bool {
        self.roles.contains(&role)
    }
}

/// One device's subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub name: String,
    /// Absolute path of the device root.
    pub root: PathBuf,
    /// Device root relative to the extraction root.
    pub rel_root: PathBuf,
    pub files: Vec<ClassifiedFile>,
}

impl DeviceGroup {
    pub fn files_with(&self, role: FileRole) -> impl Iterator<Item = &ClassifiedFile> {
        self.files.iter().filter(move |f| f.has_role(role))
    }
}

/// Walk `root` and return one group per device, ordered by name.
pub fn classify(root: &Path, archive_name: &str) -> io::Result<Vec<DeviceGroup>> {
    let base = unwrap_wrappers(root)?;

    let mut dirs = Vec::new();
    let mut loose = Vec::new();
    for entry in fs::read_dir(&base)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        } else if file_type.is_file() {
            loose.push(entry.path());
        }
    }
    dirs.sort();
    loose.sort();

    let mut groups = Vec::with_capacity(dirs.len() + 1);
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let files = collect_files(&dir)?;
        groups.push(DeviceGroup {
            name,
            rel_root: dir.strip_prefix(root).unwrap_or(&dir).to_path_buf(),
            root: dir,
            files,
        });
    }

    if !loose.is_empty() {
        let mut files = Vec::with_capacity(loose.len());
        for path in loose {
            files.push(classify_file(&base, path)?);
        }
        groups.push(DeviceGroup {
            name: archive_stem(archive_name).to_string(),
            rel_root: base.strip_prefix(root).unwrap_or(&base).to_path_buf(),
            root: base.clone(),
            files,
        });
    }

    groups.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(devices = groups.len(), "tree classified");
    Ok(groups)
}

/// Descend through directories that only hold a single subdirectory of
/// device directories. A lone directory whose children are stealer sections
/// (`Browsers/`, `Wallets/`, ...) is a device, not a wrapper.
fn unwrap_wrappers(root: &Path) -> io::Result<PathBuf> {
    let mut current = root.to_path_buf();
    loop {
        let (dirs, files) = split_children(&current)?;
        if files == 0 && dirs.len() == 1 {
            let (inner_dirs, inner_files) = split_children(&dirs[0])?;
            if inner_files == 0 && !inner_dirs.iter().any(|d| is_section_dir(d)) {
                current = dirs[0].clone();
                continue;
            }
        }
        return Ok(current);
    }
}

fn is_section_dir(dir: &Path) -> bool {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .is_some_and(|n| SECTION_DIRS.contains(&n.as_str()) || CARD_DIRS.contains(&n.as_str()))
}

fn split_children(dir: &Path) -> io::Result<(Vec<PathBuf>, usize)> {
    let mut dirs = Vec::new();
    let mut files = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        } else {
            files += 1;
        }
    }
    Ok((dirs, files))
}

fn collect_files(device_root: &Path) -> io::Result<Vec<ClassifiedFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(device_root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file() {
            files.push(classify_file(device_root, entry.into_path())?);
        }
    }
    Ok(files)
}

fn classify_file(device_root: &Path, path: PathBuf) -> io::Result<ClassifiedFile> {
    let rel = path.strip_prefix(device_root).unwrap_or(&path).to_path_buf();
    let size = fs::metadata(&path)?.len();
    let rel_path = rel
        .iter()
        .map(|c| c.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok(ClassifiedFile {
        roles: roles_for(&rel),
        path,
        rel_path,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("has parent")).expect("mkdir");
        fs::write(path, b"x").expect("write");
    }

    fn roles(rel: &str) -> Vec<FileRole> {
        roles_for(Path::new(rel))
    }

    #[test]
    fn role_rules() {
        assert_eq!(roles("Passwords.txt"), vec![FileRole::Credential]);
        assert_eq!(roles("All Passwords.txt"), vec![FileRole::Credential]);
        assert_eq!(roles("System.txt"), vec![FileRole::System]);
        assert_eq!(roles("UserInformation.txt"), vec![FileRole::System]);
        assert_eq!(roles("InstalledSoftware.txt"), vec![FileRole::Software]);
        assert_eq!(roles("Wallets/Metamask/seed.txt"), vec![FileRole::Wallet]);
        assert_eq!(roles("CC/Google Chrome_Default.txt"), vec![FileRole::Card]);
        assert_eq!(roles("CreditCards.txt"), vec![FileRole::Card]);
        assert!(roles("Screenshot.png").is_empty());
        assert!(roles("Cookies/Chrome_Default.txt").is_empty());
        // "access" contains "cc" only as a substring, not as a token.
        assert!(!roles("access.txt").contains(&FileRole::Card));
    }

    #[test]
    fn ambiguous_files_get_every_role() {
        let r = roles("wallet_passwords.txt");
        assert!(r.contains(&FileRole::Credential));
        assert!(r.contains(&FileRole::Wallet));
    }

    #[test]
    fn one_group_per_top_level_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(tmp.path(), "US[AAA]/Passwords.txt");
        touch(tmp.path(), "US[AAA]/System.txt");
        touch(tmp.path(), "DE[BBB]/Screenshot.png");
        fs::create_dir_all(tmp.path().join("FR[CCC]")).expect("mkdir");

        let groups = classify(tmp.path(), "batch.zip").expect("classifies");
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["DE[BBB]", "FR[CCC]", "US[AAA]"]);

        // Metadata-only and empty devices still produce groups.
        assert!(groups[0].files.iter().all(|f| f.roles.is_empty()));
        assert!(groups[1].files.is_empty());

        let us = &groups[2];
        assert_eq!(us.files.len(), 2);
        assert_eq!(us.files_with(FileRole::Credential).count(), 1);
        assert_eq!(us.files[0].rel_path, "Passwords.txt");
    }

    #[test]
    fn wrapper_directories_are_unwrapped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(tmp.path(), "Logs/US[AAA]/Passwords.txt");
        touch(tmp.path(), "Logs/DE[BBB]/System.txt");

        let groups = classify(tmp.path(), "batch.zip").expect("classifies");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "DE[BBB]");
        assert_eq!(groups[0].rel_root, PathBuf::from("Logs/DE[BBB]"));
    }

    #[test]
    fn single_device_archive_is_not_unwrapped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(tmp.path(), "US[AAA]/Passwords.txt");
        touch(tmp.path(), "US[AAA]/Browsers/Chrome.txt");

        let groups = classify(tmp.path(), "one.zip").expect("classifies");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "US[AAA]");
        assert_eq!(groups[0].files.len(), 2);
    }

    #[test]
    fn device_holding_only_sections_is_not_unwrapped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(tmp.path(), "US[AAA]/Browsers/Chrome/Passwords.txt");
        touch(tmp.path(), "US[AAA]/Wallets/Metamask/seed.txt");

        let groups = classify(tmp.path(), "one.zip").expect("classifies");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "US[AAA]");
        assert_eq!(groups[0].files.len(), 2);
        assert_eq!(groups[0].files_with(FileRole::Wallet).count(), 1);
    }

    #[test]
    fn loose_root_files_form_archive_device() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(tmp.path(), "Passwords.txt");
        touch(tmp.path(), "System.txt");

        let groups = classify(tmp.path(), "single_log.tar.gz").expect("classifies");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "single_log");
        assert_eq!(groups[0].files.len(), 2);
    }
}
