//! Shared types, error model, configuration, and loop lifecycle for dumpsift.
//!
//! This crate is the foundation depended on by all other dumpsift crates.
//! It provides:
//! - [`DumpsiftError`], the unified error type
//! - Domain types ([`DeviceId`], [`ChainType`], [`Credential`], [`WalletCandidate`], ...)
//! - Configuration ([`AppConfig`], [`IntakeConfig`], [`EnrichmentConfig`], config loading)
//! - Loop lifecycle ([`Shutdown`], [`Heartbeat`])

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiUnitSection, AppConfig, EnrichmentConfig, EnrichmentSection, ExtractSection,
    IntakeConfig, IntakeSection, ProvidersSection, StorageSection, SupervisorSection,
    api_key_from_env, config_dir, config_file_path, expand_home, init_config, init_config_at,
    load_config, load_config_from,
};
pub use error::{DumpsiftError, Result};
pub use lifecycle::{BEAT_EVERY, Heartbeat, Pulse, Shutdown, ShutdownTrigger, shutdown_channel};
pub use types::{
    Card, CardBrand, ChainType, Credential, DeviceId, SecretDigest, SoftwareEntry,
    SystemProfile, WalletCandidate, sha256_hex,
};
