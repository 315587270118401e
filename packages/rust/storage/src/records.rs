//! Persistence-ready rows. Built by the dedup stage, written by
//! [`Storage::commit_device`](crate::Storage::commit_device).

use chrono::{DateTime, Utc};
use dumpsift_shared::{CardBrand, ChainType, DeviceId, SecretDigest, SystemProfile};
use serde::Serialize;

/// Per-device entity counters stored on the device row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCounts {
    pub credentials: u32,
    pub files: u32,
    pub domains: u32,
    pub urls: u32,
    pub wallets: u32,
    pub cards: u32,
    pub software: u32,
}

#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub id: DeviceId,
    pub name: String,
    pub archive_name: String,
    pub upload_id: Option<String>,
    pub profile: SystemProfile,
    pub counts: DeviceCounts,
}

/// Duplicate bookkeeping shared by every deduplicated entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub key: String,
    /// Id of the canonical row, for duplicates.
    pub duplicate_of: Option<String>,
    /// Number of duplicates pointing at this row, for canonical rows.
    pub duplicate_count: u32,
}

impl Identity {
    pub fn is_canonical(&self) -> bool {
        self.duplicate_of.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub id: String,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub tld: Option<String>,
    pub username: String,
    pub password: String,
    pub browser: Option<String>,
    pub stealer: Option<String>,
    pub source_path: String,
    pub identity: Identity,
}

/// A wallet whose secret material has been replaced by digests.
#[derive(Debug, Clone)]
pub struct WalletRow {
    pub id: String,
    pub chain: ChainType,
    pub address: Option<String>,
    pub mnemonic: Option<SecretDigest>,
    pub private_key: Option<SecretDigest>,
    pub password: Option<SecretDigest>,
    pub derivation_path: Option<String>,
    pub label: Option<String>,
    pub source_path: String,
    pub identity: Identity,
}

#[derive(Debug, Clone)]
pub struct CardRow {
    pub id: String,
    pub masked_number: String,
    pub brand: CardBrand,
    pub expiry: Option<String>,
    pub holder: Option<String>,
    pub source_path: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareRow {
    pub name: String,
    pub version: Option<String>,
    pub source_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub rel_path: String,
    pub size: u64,
    /// Comma-separated role names.
    pub roles: String,
}

/// Everything recovered from one device, committed in one transaction.
#[derive(Debug, Clone)]
pub struct DeviceBundle {
    pub device: DeviceRow,
    pub credentials: Vec<CredentialRow>,
    pub wallets: Vec<WalletRow>,
    pub cards: Vec<CardRow>,
    pub system_info: Vec<(String, String)>,
    pub software: Vec<SoftwareRow>,
    pub files: Vec<FileRow>,
    pub password_stats: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Inserted,
    /// The device id already existed; nothing was written.
    Skipped,
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// A wallet selected for a balance check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletCheck {
    pub id: String,
    pub chain: ChainType,
    pub address: String,
    /// Version read at selection; the balance write is conditional on it.
    pub check_version: i64,
}

/// A resolved valuation to write back.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    /// Balance in whole coins.
    pub balance: f64,
    /// Smallest-unit integer, kept as text for precision.
    pub balance_raw: String,
    /// `None` when no price was available.
    pub balance_usd: Option<f64>,
    pub checked_at: DateTime<Utc>,
}

/// Current balance columns of one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletBalance {
    pub balance: Option<f64>,
    pub balance_usd: Option<f64>,
    pub has_balance: bool,
    pub last_checked_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub last_error: Option<String>,
    pub check_version: i64,
}

// ---------------------------------------------------------------------------
// Uploads and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Processing,
    Completed,
    Failed,
    Rejected,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

/// An upload row after `begin_upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub id: String,
    /// Attempts including the current one.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadCounts {
    pub devices: u32,
    pub skipped_devices: u32,
    pub credentials: u32,
    pub wallets: u32,
    pub cards: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub id: String,
    pub archive_name: String,
    pub status: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub device_count: u32,
    pub updated_at: String,
}

/// Whole-database counters for the `stats` command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub uploads: u64,
    pub devices: u64,
    pub credentials: u64,
    pub duplicate_credentials: u64,
    pub wallets: u64,
    pub wallets_checked: u64,
    pub wallets_with_balance: u64,
    pub total_balance_usd: f64,
    pub cards: u64,
    pub software: u64,
}

/// Current timestamp in the format stored in every `*_at` column.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
