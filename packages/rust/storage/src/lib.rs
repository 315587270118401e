//! libSQL storage layer (local file, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding uploads, devices
//! and every entity recovered from them.
//!
//! **Write rules:**
//! - the intake loop is the only creator of devices and entities, and writes
//!   each device in one transaction ([`Storage::commit_device`])
//! - the enrichment loop is the only writer of wallet balance columns, and
//!   every write is conditional on the `check_version` it read
//!   ([`Storage::record_balance`])
//! - `status`/`stats` readers use [`Storage::open_readonly`]

mod migrations;
mod records;

use std::path::Path;

use chrono::{DateTime, Utc};
use dumpsift_shared::{ChainType, DumpsiftError, Result};
use libsql::{Connection, Database, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use records::{
    BalanceUpdate, CardRow, CommitOutcome, CredentialRow, DeviceBundle, DeviceCounts, DeviceRow,
    FileRow, Identity, SoftwareRow, StoreStats, UploadCounts, UploadStatus, UploadSummary,
    UploadTicket, WalletBalance, WalletCheck, WalletRow,
};
use records::timestamp;

fn storage_err(e: libsql::Error) -> DumpsiftError {
    DumpsiftError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DumpsiftError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for reading only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DumpsiftError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DumpsiftError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DumpsiftError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Device commit
    // -----------------------------------------------------------------------

    /// Write one device and everything recovered from it in a single
    /// transaction. A device id that already exists is skipped, which makes
    /// re-ingesting an archive a no-op. Any error rolls the whole device back.
    pub async fn commit_device(&self, bundle: &DeviceBundle) -> Result<CommitOutcome> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        let exists = {
            let mut rows = tx
                .query(
                    "SELECT 1 FROM devices WHERE id = ?1",
                    params![bundle.device.id.as_str()],
                )
                .await
                .map_err(storage_err)?;
            rows.next().await.map_err(storage_err)?.is_some()
        };
        if exists {
            tx.rollback().await.map_err(storage_err)?;
            debug!(device = %bundle.device.id, "device already stored");
            return Ok(CommitOutcome::Skipped);
        }

        match write_bundle(&tx, bundle).await {
            Ok(()) => {
                tx.commit().await.map_err(storage_err)?;
                Ok(CommitOutcome::Inserted)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    pub async fn device_exists(&self, id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM devices WHERE id = ?1", params![id])
            .await
            .map_err(storage_err)?;
        Ok(rows.next().await.map_err(storage_err)?.is_some())
    }

    /// Number of rows in `table` for one device, optionally only canonical ones.
    pub async fn count_for_device(
        &self,
        table: EntityTable,
        device_id: &str,
        canonical_only: bool,
    ) -> Result<u64> {
        let filter = if canonical_only && table.has_duplicates() {
            " AND duplicate_of IS NULL"
        } else {
            ""
        };
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE device_id = ?1{filter}",
            table.as_str()
        );
        self.count(&sql, device_id).await
    }

    async fn count(&self, sql: &str, arg: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params![arg])
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// Record an attempt at `archive_name`. An unfinished row for the same
    /// archive is reused and its attempt counter incremented.
    pub async fn begin_upload(&self, archive_name: &str, size_bytes: u64) -> Result<UploadTicket> {
        self.check_writable()?;
        let now = timestamp(Utc::now());

        let mut rows = self
            .conn
            .query(
                "SELECT id, attempts FROM uploads
                 WHERE archive_name = ?1 AND status IN ('processing', 'failed')
                 ORDER BY created_at DESC LIMIT 1",
                params![archive_name],
            )
            .await
            .map_err(storage_err)?;

        if let Some(row) = rows.next().await.map_err(storage_err)? {
            let id = row.get::<String>(0).map_err(storage_err)?;
            let attempts = row.get::<u32>(1).map_err(storage_err)? + 1;
            self.conn
                .execute(
                    "UPDATE uploads SET attempts = ?1, status = 'processing', size_bytes = ?2,
                     updated_at = ?3 WHERE id = ?4",
                    params![attempts, size_bytes as i64, now.as_str(), id.as_str()],
                )
                .await
                .map_err(storage_err)?;
            return Ok(UploadTicket { id, attempts });
        }

        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO uploads (id, archive_name, size_bytes, status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'processing', 1, ?4, ?4)",
                params![id.as_str(), archive_name, size_bytes as i64, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(UploadTicket { id, attempts: 1 })
    }

    pub async fn complete_upload(&self, id: &str, counts: &UploadCounts) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE uploads SET status = 'completed', last_error = NULL, device_count = ?1,
                 skipped_devices = ?2, credential_count = ?3, wallet_count = ?4, card_count = ?5,
                 updated_at = ?6, completed_at = ?6 WHERE id = ?7",
                params![
                    counts.devices,
                    counts.skipped_devices,
                    counts.credentials,
                    counts.wallets,
                    counts.cards,
                    now.as_str(),
                    id
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark an upload `failed` (will be retried) or `rejected` (never retried).
    pub async fn fail_upload(&self, id: &str, status: UploadStatus, error: &str) -> Result<()> {
        self.check_writable()?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE uploads SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), error, now.as_str(), id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn recent_uploads(&self, limit: u32) -> Result<Vec<UploadSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, archive_name, status, attempts, last_error, device_count, updated_at
                 FROM uploads ORDER BY updated_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            out.push(UploadSummary {
                id: row.get::<String>(0).map_err(storage_err)?,
                archive_name: row.get::<String>(1).map_err(storage_err)?,
                status: row.get::<String>(2).map_err(storage_err)?,
                attempts: row.get::<u32>(3).map_err(storage_err)?,
                last_error: row.get::<Option<String>>(4).map_err(storage_err)?,
                device_count: row.get::<u32>(5).map_err(storage_err)?,
                updated_at: row.get::<String>(6).map_err(storage_err)?,
            });
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Wallet enrichment
    // -----------------------------------------------------------------------

    /// Canonical wallets with an address on one of `chains` that were never
    /// checked or were last checked before `stale_before`. Unchecked first
    /// (never attempted before recently attempted), then the stalest.
    pub async fn wallets_due_for_check(
        &self,
        chains: &[ChainType],
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WalletCheck>> {
        if chains.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        // Chain names are fixed identifiers, never user input.
        let chain_list = chains
            .iter()
            .map(|c| format!("'{}'", c.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, chain, address, check_version FROM wallets
             WHERE duplicate_of IS NULL AND address IS NOT NULL AND chain IN ({chain_list})
               AND (last_checked_at IS NULL OR last_checked_at < ?1)
             ORDER BY CASE WHEN last_checked_at IS NULL THEN 0 ELSE 1 END,
                      COALESCE(last_attempt_at, ''),
                      last_checked_at,
                      id
             LIMIT ?2"
        );

        let stale = timestamp(stale_before);
        let mut rows = self
            .conn
            .query(&sql, params![stale.as_str(), limit as i64])
            .await
            .map_err(storage_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let chain_name = row.get::<String>(1).map_err(storage_err)?;
            let Ok(chain) = chain_name.parse::<ChainType>() else {
                continue;
            };
            out.push(WalletCheck {
                id: row.get::<String>(0).map_err(storage_err)?,
                chain,
                address: row.get::<String>(2).map_err(storage_err)?,
                check_version: row.get::<i64>(3).map_err(storage_err)?,
            });
        }
        Ok(out)
    }

    /// Write a resolved balance. All balance columns change in one statement,
    /// and only if nobody else wrote since `expected_version` was read.
    /// Returns `false` when the write lost that race.
    pub async fn record_balance(
        &self,
        wallet_id: &str,
        expected_version: i64,
        update: &BalanceUpdate,
    ) -> Result<bool> {
        self.check_writable()?;
        let checked_at = timestamp(update.checked_at);
        let changed = self
            .conn
            .execute(
                "UPDATE wallets SET
                    balance = ?1,
                    balance_raw = ?2,
                    balance_usd = ?3,
                    has_balance = (?1 > 0),
                    last_checked_at = ?4,
                    last_attempt_at = ?4,
                    last_error = NULL,
                    check_version = check_version + 1
                 WHERE id = ?5 AND check_version = ?6",
                params![
                    update.balance,
                    update.balance_raw.as_str(),
                    update.balance_usd,
                    checked_at.as_str(),
                    wallet_id,
                    expected_version
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed == 1)
    }

    /// Note a failed check. Balance columns are left untouched.
    pub async fn record_check_failure(
        &self,
        wallet_id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        let at = timestamp(at);
        self.conn
            .execute(
                "UPDATE wallets SET last_attempt_at = ?1, last_error = ?2 WHERE id = ?3",
                params![at.as_str(), error, wallet_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn wallet_balance(&self, wallet_id: &str) -> Result<Option<WalletBalance>> {
        let mut rows = self
            .conn
            .query(
                "SELECT balance, balance_usd, has_balance, last_checked_at, last_attempt_at,
                        last_error, check_version
                 FROM wallets WHERE id = ?1",
                params![wallet_id],
            )
            .await
            .map_err(storage_err)?;

        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(None);
        };
        Ok(Some(WalletBalance {
            balance: row.get::<Option<f64>>(0).map_err(storage_err)?,
            balance_usd: row.get::<Option<f64>>(1).map_err(storage_err)?,
            has_balance: row.get::<i64>(2).map_err(storage_err)? != 0,
            last_checked_at: row.get::<Option<String>>(3).map_err(storage_err)?,
            last_attempt_at: row.get::<Option<String>>(4).map_err(storage_err)?,
            last_error: row.get::<Option<String>>(5).map_err(storage_err)?,
            check_version: row.get::<i64>(6).map_err(storage_err)?,
        }))
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub async fn stats(&self) -> Result<StoreStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    (SELECT COUNT(*) FROM uploads),
                    (SELECT COUNT(*) FROM devices),
                    (SELECT COUNT(*) FROM credentials WHERE duplicate_of IS NULL),
                    (SELECT COUNT(*) FROM credentials WHERE duplicate_of IS NOT NULL),
                    (SELECT COUNT(*) FROM wallets WHERE duplicate_of IS NULL),
                    (SELECT COUNT(*) FROM wallets WHERE last_checked_at IS NOT NULL),
                    (SELECT COUNT(*) FROM wallets WHERE has_balance = 1),
                    (SELECT COALESCE(SUM(balance_usd), 0.0) FROM wallets WHERE has_balance = 1),
                    (SELECT COUNT(*) FROM credit_cards WHERE duplicate_of IS NULL),
                    (SELECT COUNT(*) FROM software)",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let Some(row) = rows.next().await.map_err(storage_err)? else {
            return Ok(StoreStats::default());
        };
        let n = |i: i32| -> Result<u64> { Ok(row.get::<i64>(i).map_err(storage_err)?.max(0) as u64) };
        Ok(StoreStats {
            uploads: n(0)?,
            devices: n(1)?,
            credentials: n(2)?,
            duplicate_credentials: n(3)?,
            wallets: n(4)?,
            wallets_checked: n(5)?,
            wallets_with_balance: n(6)?,
            total_balance_usd: row.get::<f64>(7).map_err(storage_err)?,
            cards: n(8)?,
            software: n(9)?,
        })
    }
}

/// Tables holding per-device entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTable {
    Credentials,
    Wallets,
    Cards,
    SystemInfo,
    Software,
    Files,
    PasswordStats,
}

impl EntityTable {
    fn as_str(self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::Wallets => "wallets",
            Self::Cards => "credit_cards",
            Self::SystemInfo => "system_info",
            Self::Software => "software",
            Self::Files => "device_files",
            Self::PasswordStats => "password_stats",
        }
    }

    fn has_duplicates(self) -> bool {
        matches!(self, Self::Credentials | Self::Wallets | Self::Cards)
    }
}

// ---------------------------------------------------------------------------
// Bundle writer
// ---------------------------------------------------------------------------

async fn write_bundle(conn: &Connection, bundle: &DeviceBundle) -> Result<()> {
    let now = timestamp(Utc::now());
    let device = &bundle.device;
    let device_id = device.id.as_str();
    let p = &device.profile;
    let c = &device.counts;

    conn.execute(
        "INSERT INTO devices (id, name, archive_name, upload_id, hostname, ip, country, os,
            username, language, antivirus, hwid, infected_at, stealer, credential_count,
            file_count, domain_count, url_count, wallet_count, card_count, software_count,
            created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
            ?18, ?19, ?20, ?21, ?22)",
        params![
            device_id,
            device.name.as_str(),
            device.archive_name.as_str(),
            device.upload_id.as_deref(),
            p.hostname.as_deref(),
            p.ip.as_deref(),
            p.country.as_deref(),
            p.os.as_deref(),
            p.username.as_deref(),
            p.language.as_deref(),
            p.antivirus.as_deref(),
            p.hwid.as_deref(),
            p.infected_at.as_deref(),
            p.stealer.as_deref(),
            c.credentials,
            c.files,
            c.domains,
            c.urls,
            c.wallets,
            c.cards,
            c.software,
            now.as_str()
        ],
    )
    .await
    .map_err(storage_err)?;

    for cred in &bundle.credentials {
        conn.execute(
            "INSERT INTO credentials (id, device_id, url, domain, tld, username, password,
                browser, stealer, source_path, identity_key, duplicate_of, duplicate_count,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                cred.id.as_str(),
                device_id,
                cred.url.as_deref(),
                cred.domain.as_deref(),
                cred.tld.as_deref(),
                cred.username.as_str(),
                cred.password.as_str(),
                cred.browser.as_deref(),
                cred.stealer.as_deref(),
                cred.source_path.as_str(),
                cred.identity.key.as_str(),
                cred.identity.duplicate_of.as_deref(),
                cred.identity.duplicate_count,
                now.as_str()
            ],
        )
        .await
        .map_err(storage_err)?;
    }

    for wallet in &bundle.wallets {
        conn.execute(
            "INSERT INTO wallets (id, device_id, chain, address, mnemonic_hash, private_key_hash,
                password_hash, derivation_path, label, source_path, identity_key, duplicate_of,
                duplicate_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                wallet.id.as_str(),
                device_id,
                wallet.chain.as_str(),
                wallet.address.as_deref(),
                wallet.mnemonic.as_ref().map(|d| d.as_str()),
                wallet.private_key.as_ref().map(|d| d.as_str()),
                wallet.password.as_ref().map(|d| d.as_str()),
                wallet.derivation_path.as_deref(),
                wallet.label.as_deref(),
                wallet.source_path.as_str(),
                wallet.identity.key.as_str(),
                wallet.identity.duplicate_of.as_deref(),
                wallet.identity.duplicate_count,
                now.as_str()
            ],
        )
        .await
        .map_err(storage_err)?;
    }

    for card in &bundle.cards {
        conn.execute(
            "INSERT INTO credit_cards (id, device_id, masked_number, brand, expiry, holder,
                source_path, identity_key, duplicate_of, duplicate_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                card.id.as_str(),
                device_id,
                card.masked_number.as_str(),
                card.brand.as_str(),
                card.expiry.as_deref(),
                card.holder.as_deref(),
                card.source_path.as_str(),
                card.identity.key.as_str(),
                card.identity.duplicate_of.as_deref(),
                card.identity.duplicate_count,
                now.as_str()
            ],
        )
        .await
        .map_err(storage_err)?;
    }

    for (key, value) in &bundle.system_info {
        conn.execute(
            "INSERT INTO system_info (device_id, key, value) VALUES (?1, ?2, ?3)",
            params![device_id, key.as_str(), value.as_str()],
        )
        .await
        .map_err(storage_err)?;
    }

    for sw in &bundle.software {
        conn.execute(
            "INSERT INTO software (device_id, name, version, source_path) VALUES (?1, ?2, ?3, ?4)",
            params![
                device_id,
                sw.name.as_str(),
                sw.version.as_deref(),
                sw.source_path.as_str()
            ],
        )
        .await
        .map_err(storage_err)?;
    }

    for file in &bundle.files {
        conn.execute(
            "INSERT INTO device_files (device_id, rel_path, size, roles) VALUES (?1, ?2, ?3, ?4)",
            params![
                device_id,
                file.rel_path.as_str(),
                file.size as i64,
                file.roles.as_str()
            ],
        )
        .await
        .map_err(storage_err)?;
    }

    for (password, occurrences) in &bundle.password_stats {
        conn.execute(
            "INSERT INTO password_stats (device_id, password, occurrences) VALUES (?1, ?2, ?3)",
            params![device_id, password.as_str(), *occurrences],
        )
        .await
        .map_err(storage_err)?;
    }

    debug!(
        device = device_id,
        credentials = bundle.credentials.len(),
        wallets = bundle.wallets.len(),
        cards = bundle.cards.len(),
        "device written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use dumpsift_shared::{CardBrand, DeviceId, SecretDigest, SystemProfile};

    use super::*;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("dumpsift_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn identity(key: &str) -> Identity {
        Identity {
            key: key.to_string(),
            ..Identity::default()
        }
    }

    fn bundle(archive: &str, device: &str) -> DeviceBundle {
        let id = DeviceId::derive(archive, device);
        let cred_id = Uuid::now_v7().to_string();
        DeviceBundle {
            device: DeviceRow {
                id,
                name: device.to_string(),
                archive_name: archive.to_string(),
                upload_id: None,
                profile: SystemProfile {
                    hostname: Some("DESKTOP-1".into()),
                    ..SystemProfile::default()
                },
                counts: DeviceCounts {
                    credentials: 2,
                    wallets: 1,
                    ..DeviceCounts::default()
                },
            },
            credentials: vec![
                CredentialRow {
                    id: cred_id.clone(),
                    url: Some("https://a.com".into()),
                    domain: Some("a.com".into()),
                    tld: Some("com".into()),
                    username: "alice".into(),
                    password: "pw".into(),
                    browser: None,
                    stealer: None,
                    source_path: "Passwords.txt".into(),
                    identity: Identity {
                        duplicate_count: 1,
                        ..identity("k1")
                    },
                },
                CredentialRow {
                    id: Uuid::now_v7().to_string(),
                    url: Some("https://a.com".into()),
                    domain: Some("a.com".into()),
                    tld: Some("com".into()),
                    username: "alice".into(),
                    password: "pw".into(),
                    browser: None,
                    stealer: None,
                    source_path: "Passwords.txt".into(),
                    identity: Identity {
                        duplicate_of: Some(cred_id),
                        ..identity("k1")
                    },
                },
            ],
            wallets: vec![wallet_row(
                ChainType::Ethereum,
                "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe",
            )],
            cards: vec![CardRow {
                id: Uuid::now_v7().to_string(),
                masked_number: "************1111".into(),
                brand: CardBrand::Visa,
                expiry: Some("07/2027".into()),
                holder: None,
                source_path: "CC/cards.txt".into(),
                identity: identity("c1"),
            }],
            system_info: vec![("ip".into(), "1.2.3.4".into())],
            software: vec![SoftwareRow {
                name: "Steam".into(),
                version: None,
                source_path: "InstalledSoftware.txt".into(),
            }],
            files: vec![FileRow {
                rel_path: "Passwords.txt".into(),
                size: 42,
                roles: "credential".into(),
            }],
            password_stats: vec![("pw".into(), 2)],
        }
    }

    fn wallet_row(chain: ChainType, address: &str) -> WalletRow {
        WalletRow {
            id: Uuid::now_v7().to_string(),
            chain,
            address: Some(address.to_string()),
            mnemonic: Some(SecretDigest::of("abandon ability")),
            private_key: None,
            password: None,
            derivation_path: None,
            label: None,
            source_path: "wallet.txt".into(),
            identity: identity(&format!("{}:{address}", chain.as_str())),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("dumpsift_test_{}.db", Uuid::now_v7()));
        let first = Storage::open(&tmp).await.expect("first open");
        drop(first);
        let second = Storage::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn commit_is_idempotent_per_device() {
        let storage = test_storage().await;
        let b = bundle("logs.zip", "US[AAA]");
        let id = b.device.id.as_str().to_string();

        assert_eq!(storage.commit_device(&b).await.expect("commit"), CommitOutcome::Inserted);
        assert_eq!(storage.commit_device(&b).await.expect("recommit"), CommitOutcome::Skipped);

        assert!(storage.device_exists(&id).await.expect("exists"));
        let total = storage
            .count_for_device(EntityTable::Credentials, &id, false)
            .await
            .expect("count");
        let canonical = storage
            .count_for_device(EntityTable::Credentials, &id, true)
            .await
            .expect("count");
        assert_eq!((total, canonical), (2, 1));
        for table in [
            EntityTable::Wallets,
            EntityTable::Cards,
            EntityTable::SystemInfo,
            EntityTable::Software,
            EntityTable::Files,
            EntityTable::PasswordStats,
        ] {
            let n = storage.count_for_device(table, &id, false).await.expect("count");
            assert_eq!(n, 1, "{table:?}");
        }
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_behind() {
        let storage = test_storage().await;
        let mut b = bundle("logs.zip", "US[BBB]");
        // Same primary key twice: the second insert fails mid-transaction.
        let dup = b.cards[0].clone();
        b.cards.push(dup);

        assert!(storage.commit_device(&b).await.is_err());
        let id = b.device.id.as_str();
        assert!(!storage.device_exists(id).await.expect("exists"));
        let creds = storage
            .count_for_device(EntityTable::Credentials, id, false)
            .await
            .expect("count");
        assert_eq!(creds, 0);
    }

    #[tokio::test]
    async fn upload_attempts_accumulate() {
        let storage = test_storage().await;
        let first = storage.begin_upload("a.zip", 10).await.expect("begin");
        assert_eq!(first.attempts, 1);
        storage
            .fail_upload(&first.id, UploadStatus::Failed, "db locked")
            .await
            .expect("fail");

        let second = storage.begin_upload("a.zip", 10).await.expect("begin");
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);

        storage
            .complete_upload(&second.id, &UploadCounts { devices: 1, ..UploadCounts::default() })
            .await
            .expect("complete");
        let third = storage.begin_upload("a.zip", 10).await.expect("begin");
        assert_ne!(third.id, first.id);
        assert_eq!(third.attempts, 1);

        let recent = storage.recent_uploads(10).await.expect("recent");
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn balance_write_is_conditional_on_version() {
        let storage = test_storage().await;
        let b = bundle("logs.zip", "US[CCC]");
        storage.commit_device(&b).await.expect("commit");

        let due = storage
            .wallets_due_for_check(&[ChainType::Ethereum], Utc::now(), 10)
            .await
            .expect("select");
        assert_eq!(due.len(), 1);
        let check = &due[0];
        assert_eq!(check.check_version, 0);

        let update = BalanceUpdate {
            balance: 1.5,
            balance_raw: "1500000000000000000".into(),
            balance_usd: Some(3000.0),
            checked_at: Utc::now(),
        };
        assert!(storage.record_balance(&check.id, 0, &update).await.expect("write"));
        // A second writer holding the old version loses.
        assert!(!storage.record_balance(&check.id, 0, &update).await.expect("write"));

        let stored = storage
            .wallet_balance(&check.id)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(stored.balance, Some(1.5));
        assert_eq!(stored.balance_usd, Some(3000.0));
        assert!(stored.has_balance);
        assert!(stored.last_checked_at.is_some());
        assert_eq!(stored.check_version, 1);

        // Fresh wallets are not due again until stale.
        let due = storage
            .wallets_due_for_check(&[ChainType::Ethereum], Utc::now() - Duration::hours(1), 10)
            .await
            .expect("select");
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn zero_balance_clears_has_balance() {
        let storage = test_storage().await;
        let b = bundle("logs.zip", "US[DDD]");
        storage.commit_device(&b).await.expect("commit");
        let id = b.wallets[0].id.clone();

        let update = BalanceUpdate {
            balance: 0.0,
            balance_raw: "0".into(),
            balance_usd: None,
            checked_at: Utc::now(),
        };
        assert!(storage.record_balance(&id, 0, &update).await.expect("write"));
        let stored = storage.wallet_balance(&id).await.expect("read").expect("exists");
        assert!(!stored.has_balance);
        assert_eq!(stored.balance_usd, None);
    }

    #[tokio::test]
    async fn failures_only_touch_bookkeeping() {
        let storage = test_storage().await;
        let b = bundle("logs.zip", "US[EEE]");
        storage.commit_device(&b).await.expect("commit");
        let id = b.wallets[0].id.clone();

        storage
            .record_check_failure(&id, "all providers failed", Utc::now())
            .await
            .expect("record");
        let stored = storage.wallet_balance(&id).await.expect("read").expect("exists");
        assert_eq!(stored.balance, None);
        assert!(stored.last_checked_at.is_none());
        assert_eq!(stored.last_error.as_deref(), Some("all providers failed"));
        assert_eq!(stored.check_version, 0);
    }

    #[tokio::test]
    async fn selection_orders_never_attempted_first() {
        let storage = test_storage().await;
        let mut b = bundle("logs.zip", "US[FFF]");
        b.wallets = vec![
            wallet_row(ChainType::Bitcoin, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            wallet_row(ChainType::Bitcoin, "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"),
            wallet_row(ChainType::Tron, "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8"),
        ];
        storage.commit_device(&b).await.expect("commit");
        storage
            .record_check_failure(&b.wallets[0].id, "timeout", Utc::now())
            .await
            .expect("record");

        let due = storage
            .wallets_due_for_check(&[ChainType::Bitcoin], Utc::now(), 10)
            .await
            .expect("select");
        let ids: Vec<&str> = due.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec![b.wallets[1].id.as_str(), b.wallets[0].id.as_str()]);
    }

    #[tokio::test]
    async fn stats_count_canonical_rows() {
        let storage = test_storage().await;
        storage
            .commit_device(&bundle("logs.zip", "US[GGG]"))
            .await
            .expect("commit");
        let stats = storage.stats().await.expect("stats");
        assert_eq!(stats.devices, 1);
        assert_eq!(stats.credentials, 1);
        assert_eq!(stats.duplicate_credentials, 1);
        assert_eq!(stats.wallets, 1);
        assert_eq!(stats.cards, 1);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("dumpsift_test_{}.db", Uuid::now_v7()));
        drop(Storage::open(&tmp).await.expect("create"));
        let ro = Storage::open_readonly(&tmp).await.expect("open ro");
        let result = ro.begin_upload("a.zip", 1).await;
        assert!(result.is_err());
        assert!(ro.stats().await.is_ok());
    }
}
