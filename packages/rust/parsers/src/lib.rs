//! Entity parsers for stealer-log files.
//!
//! Each parser turns the raw bytes of one file into zero or more candidate
//! records. Parsers are pure and never fail: unreadable input yields an empty
//! list. Every parser prefers structured `key: value` blocks and only falls
//! back to pattern scanning when the file holds no structured record.

mod card;
mod credential;
mod domain;
pub mod stealer;
mod software;
mod system;
pub mod text;
mod wallet;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;

use tracing::warn;

pub use card::{CardParser, brand_of, luhn_valid, mask};
pub use credential::CredentialParser;
pub use domain::{DomainParts, extract_domain};
pub use software::SoftwareParser;
pub use system::SystemInfoParser;
pub use wallet::{
    WalletParser, chain_from_address, is_hex_private_key, is_private_key, is_valid_mnemonic,
    is_wif, normalize_mnemonic,
};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A stateless transform from file bytes to candidate records.
pub trait EntityParser: Send + Sync {
    type Record;

    /// Short parser name for tracing.
    fn name(&self) -> &'static str;

    fn parse(&self, raw: &[u8]) -> Vec<Self::Record>;
}

/// Run `parser` over one file, turning a panic into an empty result.
///
/// One malformed file must not take down the rest of the device, so the
/// failure is logged with the file path and parsing moves on.
pub fn parse_guarded<P: EntityParser>(parser: &P, raw: &[u8], path: &Path) -> Vec<P::Record> {
    match catch_unwind(AssertUnwindSafe(|| parser.parse(raw))) {
        Ok(records) => records,
        Err(_) => {
            warn!(parser = parser.name(), path = %path.display(), "parser panicked; file skipped");
            Vec::new()
        }
    }
}
