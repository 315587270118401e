//! Application configuration for dumpsift.
//!
//! User config lives at `~/.dumpsift/dumpsift.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DumpsiftError, Result};
use crate::types::ChainType;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "dumpsift.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".dumpsift";

// ---------------------------------------------------------------------------
// Config structs (matching dumpsift.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub intake: IntakeSection,

    #[serde(default)]
    pub extract: ExtractSection,

    #[serde(default)]
    pub enrichment: EnrichmentSection,

    #[serde(default)]
    pub providers: ProvidersSection,

    #[serde(default)]
    pub supervisor: SupervisorSection,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// libSQL database file. `~/` is expanded.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory for heartbeat and supervisor status files.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            state_dir: default_state_dir(),
        }
    }
}

fn default_database_path() -> String {
    "~/.dumpsift/dumpsift.db".into()
}
fn default_state_dir() -> String {
    "~/.dumpsift/state".into()
}

/// `[intake]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeSection {
    /// Directory watched for incoming archives.
    #[serde(default = "default_watch_dir")]
    pub watch_dir: String,

    /// Seconds between directory polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Persistence attempts before an archive is moved to `failed/`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// An archive whose size changes within this window is still being written.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for IntakeSection {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
            settle_ms: default_settle_ms(),
        }
    }
}

fn default_watch_dir() -> String {
    "~/.dumpsift/incoming".into()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_settle_ms() -> u64 {
    500
}

/// `[extract]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSection {
    /// External 7-Zip binary used for `.7z` and `.rar` containers.
    #[serde(default = "default_seven_zip_bin")]
    pub seven_zip_bin: String,

    /// Candidate passwords tried on encrypted containers, in order.
    #[serde(default = "default_passwords")]
    pub passwords: Vec<String>,

    /// Largest single entry written to disk.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,

    /// Total bytes written for one top-level archive.
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: u64,
}

impl Default for ExtractSection {
    fn default() -> Self {
        Self {
            seven_zip_bin: default_seven_zip_bin(),
            passwords: default_passwords(),
            max_entry_bytes: default_max_entry_bytes(),
            max_total_bytes: default_max_total_bytes(),
        }
    }
}

fn default_seven_zip_bin() -> String {
    "7z".into()
}
fn default_passwords() -> Vec<String> {
    [
        "infected", "123", "1234", "12345", "password", "logs", "cloud", "free",
        "telegram", "@logs", "2024", "2025",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_max_entry_bytes() -> u64 {
    2 * 1024 * 1024 * 1024
}
fn default_max_total_bytes() -> u64 {
    20 * 1024 * 1024 * 1024
}

/// `[enrichment]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSection {
    /// Seconds between enrichment cycles.
    #[serde(default = "default_enrichment_interval")]
    pub interval_secs: u64,

    /// Wallets checked concurrently per batch.
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,

    /// Pause between batches, in milliseconds.
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,

    /// Maximum wallets selected per cycle.
    #[serde(default = "default_cycle_limit")]
    pub cycle_limit: usize,

    /// Hours after which a resolved balance is rechecked.
    #[serde(default = "default_stale_after")]
    pub stale_after_hours: u64,

    /// Address balance cache TTL.
    #[serde(default = "default_cache_ttl")]
    pub balance_cache_ttl_secs: u64,

    /// Price cache TTL.
    #[serde(default = "default_cache_ttl")]
    pub price_cache_ttl_secs: u64,

    /// Upper bound on a single provider call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            interval_secs: default_enrichment_interval(),
            batch_width: default_batch_width(),
            batch_pause_ms: default_batch_pause(),
            cycle_limit: default_cycle_limit(),
            stale_after_hours: default_stale_after(),
            balance_cache_ttl_secs: default_cache_ttl(),
            price_cache_ttl_secs: default_cache_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_enrichment_interval() -> u64 {
    3600
}
fn default_batch_width() -> usize {
    10
}
fn default_batch_pause() -> u64 {
    1000
}
fn default_cycle_limit() -> usize {
    100
}
fn default_stale_after() -> u64 {
    24
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_request_timeout() -> u64 {
    15
}

/// `[providers]` section: which provider answers for which chain, and where
/// the endpoints live. API keys are read from the named env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersSection {
    /// Chain key (see `ChainType::as_str`) to provider names, primary first.
    #[serde(default = "default_chain_providers")]
    pub chains: BTreeMap<String, Vec<String>>,

    /// Requests per second allowed against each provider.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_blockchain_info_url")]
    pub blockchain_info_url: String,

    #[serde(default = "default_blockchair_url")]
    pub blockchair_url: String,

    #[serde(default = "default_etherscan_url")]
    pub etherscan_url: String,

    #[serde(default = "default_bscscan_url")]
    pub bscscan_url: String,

    #[serde(default = "default_polygonscan_url")]
    pub polygonscan_url: String,

    #[serde(default = "default_cryptocompare_url")]
    pub cryptocompare_url: String,

    #[serde(default = "default_etherscan_key_env")]
    pub etherscan_api_key_env: String,

    #[serde(default = "default_bscscan_key_env")]
    pub bscscan_api_key_env: String,

    #[serde(default = "default_polygonscan_key_env")]
    pub polygonscan_api_key_env: String,

    #[serde(default = "default_cryptocompare_key_env")]
    pub cryptocompare_api_key_env: String,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            chains: default_chain_providers(),
            requests_per_second: default_requests_per_second(),
            blockchain_info_url: default_blockchain_info_url(),
            blockchair_url: default_blockchair_url(),
            etherscan_url: default_etherscan_url(),
            bscscan_url: default_bscscan_url(),
            polygonscan_url: default_polygonscan_url(),
            cryptocompare_url: default_cryptocompare_url(),
            etherscan_api_key_env: default_etherscan_key_env(),
            bscscan_api_key_env: default_bscscan_key_env(),
            polygonscan_api_key_env: default_polygonscan_key_env(),
            cryptocompare_api_key_env: default_cryptocompare_key_env(),
        }
    }
}

impl ProvidersSection {
    /// Provider names for `chain`, primary first. Empty when the chain is not enriched.
    pub fn providers_for(&self, chain: ChainType) -> &[String] {
        self.chains
            .get(chain.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Reject chain keys that do not name a known chain.
    pub fn validate(&self) -> Result<()> {
        for key in self.chains.keys() {
            key.parse::<ChainType>()
                .map_err(|e| DumpsiftError::config(format!("[providers.chains] {e}")))?;
        }
        if self.requests_per_second == 0 {
            return Err(DumpsiftError::config(
                "[providers] requests_per_second must be at least 1",
            ));
        }
        Ok(())
    }
}

fn default_chain_providers() -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    map.insert(
        "bitcoin".into(),
        vec!["blockchain_info".into(), "blockchair".into()],
    );
    map.insert(
        "ethereum".into(),
        vec!["etherscan".into(), "blockchair".into()],
    );
    map.insert("bsc".into(), vec!["bscscan".into()]);
    map.insert("polygon".into(), vec!["polygonscan".into()]);
    map.insert("litecoin".into(), vec!["blockchair".into()]);
    map.insert("dogecoin".into(), vec!["blockchair".into()]);
    map
}
fn default_requests_per_second() -> u32 {
    5
}
fn default_blockchain_info_url() -> String {
    "https://blockchain.info".into()
}
fn default_blockchair_url() -> String {
    "https://api.blockchair.com".into()
}
fn default_etherscan_url() -> String {
    "https://api.etherscan.io/api".into()
}
fn default_bscscan_url() -> String {
    "https://api.bscscan.com/api".into()
}
fn default_polygonscan_url() -> String {
    "https://api.polygonscan.com/api".into()
}
fn default_cryptocompare_url() -> String {
    "https://min-api.cryptocompare.com".into()
}
fn default_etherscan_key_env() -> String {
    "ETHERSCAN_API_KEY".into()
}
fn default_bscscan_key_env() -> String {
    "BSCSCAN_API_KEY".into()
}
fn default_polygonscan_key_env() -> String {
    "POLYGONSCAN_API_KEY".into()
}
fn default_cryptocompare_key_env() -> String {
    "CRYPTOCOMPARE_API_KEY".into()
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_health_interval")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Consecutive failures tolerated before a unit is failed permanently.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// A unit healthy for this long has its failure counter reset.
    #[serde(default = "default_stable_after")]
    pub stable_after_secs: u64,

    /// Time a unit gets to stop before it is killed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// A loop whose heartbeat is older than this is considered hung.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub intake_enabled: bool,

    #[serde(default = "default_true")]
    pub enrichment_enabled: bool,

    #[serde(default)]
    pub api: ApiUnitSection,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_interval(),
            restart_delay_secs: default_restart_delay(),
            max_restarts: default_max_restarts(),
            stable_after_secs: default_stable_after(),
            shutdown_grace_secs: default_shutdown_grace(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            intake_enabled: true,
            enrichment_enabled: true,
            api: ApiUnitSection::default(),
        }
    }
}

fn default_health_interval() -> u64 {
    30
}
fn default_restart_delay() -> u64 {
    5
}
fn default_max_restarts() -> u32 {
    3
}
fn default_stable_after() -> u64 {
    300
}
fn default_shutdown_grace() -> u64 {
    10
}
fn default_heartbeat_timeout() -> u64 {
    900
}
fn default_true() -> bool {
    true
}

/// `[supervisor.api]`: the externally provided request-serving process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUnitSection {
    /// Program and arguments. Empty disables the unit.
    #[serde(default)]
    pub command: Vec<String>,

    /// Probed with GET; any 2xx counts as healthy.
    #[serde(default = "default_health_url")]
    pub health_url: String,
}

impl Default for ApiUnitSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            health_url: default_health_url(),
        }
    }
}

fn default_health_url() -> String {
    "http://127.0.0.1:8000/health".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime settings for the archive intake loop.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    pub watch_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub settle: Duration,
    /// Beat period while a blocking stage runs.
    pub heartbeat_every: Duration,
    pub extract: ExtractSection,
}

impl From<&AppConfig> for IntakeConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            watch_dir: expand_home(&config.intake.watch_dir),
            poll_interval: Duration::from_secs(config.intake.poll_interval_secs.max(1)),
            max_attempts: config.intake.max_attempts.max(1),
            settle: Duration::from_millis(config.intake.settle_ms),
            heartbeat_every: crate::lifecycle::BEAT_EVERY,
            extract: config.extract.clone(),
        }
    }
}

/// Runtime settings for the balance enrichment loop.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub interval: Duration,
    pub batch_width: usize,
    pub batch_pause: Duration,
    pub cycle_limit: usize,
    pub stale_after: Duration,
    pub balance_ttl: Duration,
    pub price_ttl: Duration,
    pub request_timeout: Duration,
}

impl From<&AppConfig> for EnrichmentConfig {
    fn from(config: &AppConfig) -> Self {
        let e = &config.enrichment;
        Self {
            interval: Duration::from_secs(e.interval_secs.max(1)),
            batch_width: e.batch_width.max(1),
            batch_pause: Duration::from_millis(e.batch_pause_ms),
            cycle_limit: e.cycle_limit.max(1),
            stale_after: Duration::from_secs(e.stale_after_hours * 3600),
            balance_ttl: Duration::from_secs(e.balance_cache_ttl_secs),
            price_ttl: Duration::from_secs(e.price_cache_ttl_secs),
            request_timeout: Duration::from_secs(e.request_timeout_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Get the path to the config directory (`~/.dumpsift/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DumpsiftError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.dumpsift/dumpsift.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DumpsiftError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        DumpsiftError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.providers.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write the default config to `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| DumpsiftError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DumpsiftError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| DumpsiftError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

/// Read an API key from the env var named in config. Unset or empty means no key.
pub fn api_key_from_env(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.is_empty())
}
