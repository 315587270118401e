//! SQL migration definitions for the dumpsift database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: uploads, devices, entities, inventories",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per archive seen by the intake loop
CREATE TABLE IF NOT EXISTS uploads (
    id               TEXT PRIMARY KEY,
    archive_name     TEXT NOT NULL,
    size_bytes       INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL,
    attempts         INTEGER NOT NULL DEFAULT 0,
    last_error       TEXT,
    device_count     INTEGER NOT NULL DEFAULT 0,
    skipped_devices  INTEGER NOT NULL DEFAULT 0,
    credential_count INTEGER NOT NULL DEFAULT 0,
    wallet_count     INTEGER NOT NULL DEFAULT 0,
    card_count       INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    completed_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_uploads_archive ON uploads(archive_name);
CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status);

-- One compromised host per archive subtree; never mutated after insert
CREATE TABLE IF NOT EXISTS devices (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    archive_name     TEXT NOT NULL,
    upload_id        TEXT REFERENCES uploads(id),
    hostname         TEXT,
    ip               TEXT,
    country          TEXT,
    os               TEXT,
    username         TEXT,
    language         TEXT,
    antivirus        TEXT,
    hwid             TEXT,
    infected_at      TEXT,
    stealer          TEXT,
    credential_count INTEGER NOT NULL DEFAULT 0,
    file_count       INTEGER NOT NULL DEFAULT 0,
    domain_count     INTEGER NOT NULL DEFAULT 0,
    url_count        INTEGER NOT NULL DEFAULT 0,
    wallet_count     INTEGER NOT NULL DEFAULT 0,
    card_count       INTEGER NOT NULL DEFAULT 0,
    software_count   INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_devices_upload ON devices(upload_id);

CREATE TABLE IF NOT EXISTS credentials (
    id              TEXT PRIMARY KEY,
    device_id       TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    url             TEXT,
    domain          TEXT,
    tld             TEXT,
    username        TEXT NOT NULL,
    password        TEXT NOT NULL,
    browser         TEXT,
    stealer         TEXT,
    source_path     TEXT NOT NULL,
    identity_key    TEXT NOT NULL,
    duplicate_of    TEXT,
    duplicate_count INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credentials_device ON credentials(device_id);
CREATE INDEX IF NOT EXISTS idx_credentials_identity ON credentials(device_id, identity_key);
CREATE INDEX IF NOT EXISTS idx_credentials_domain ON credentials(domain);

-- Secret columns only ever hold SHA-256 hex digests
CREATE TABLE IF NOT EXISTS wallets (
    id               TEXT PRIMARY KEY,
    device_id        TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    chain            TEXT NOT NULL,
    address          TEXT,
    mnemonic_hash    TEXT CHECK (mnemonic_hash IS NULL OR length(mnemonic_hash) = 64),
    private_key_hash TEXT CHECK (private_key_hash IS NULL OR length(private_key_hash) = 64),
    password_hash    TEXT CHECK (password_hash IS NULL OR length(password_hash) = 64),
    derivation_path  TEXT,
    label            TEXT,
    source_path      TEXT NOT NULL,
    identity_key     TEXT NOT NULL,
    duplicate_of     TEXT,
    duplicate_count  INTEGER NOT NULL DEFAULT 0,
    balance          REAL,
    balance_raw      TEXT,
    balance_usd      REAL,
    has_balance      INTEGER NOT NULL DEFAULT 0,
    last_checked_at  TEXT,
    last_attempt_at  TEXT,
    last_error       TEXT,
    check_version    INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wallets_device ON wallets(device_id);
CREATE INDEX IF NOT EXISTS idx_wallets_check ON wallets(chain, last_checked_at);

CREATE TABLE IF NOT EXISTS credit_cards (
    id              TEXT PRIMARY KEY,
    device_id       TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    masked_number   TEXT NOT NULL,
    brand           TEXT NOT NULL,
    expiry          TEXT,
    holder          TEXT,
    source_path     TEXT NOT NULL,
    identity_key    TEXT NOT NULL,
    duplicate_of    TEXT,
    duplicate_count INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cards_device ON credit_cards(device_id);

CREATE TABLE IF NOT EXISTS system_info (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    key       TEXT NOT NULL,
    value     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_system_info_device ON system_info(device_id);

CREATE TABLE IF NOT EXISTS software (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id   TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    version     TEXT,
    source_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_software_device ON software(device_id);

-- File inventory; content is never stored
CREATE TABLE IF NOT EXISTS device_files (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    rel_path  TEXT NOT NULL,
    size      INTEGER NOT NULL,
    roles     TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_device_files_device ON device_files(device_id);

CREATE TABLE IF NOT EXISTS password_stats (
    device_id   TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    password    TEXT NOT NULL,
    occurrences INTEGER NOT NULL,
    PRIMARY KEY (device_id, password)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
