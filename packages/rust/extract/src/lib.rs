//! Archive extraction and device classification.
//!
//! [`Extractor`] unpacks an uploaded container (and everything nested in it)
//! into a temporary tree; [`classify`] groups that tree into per-device file
//! lists tagged with [`FileRole`]s for the parsers.

mod archive;
mod classify;
mod detect;

pub use archive::{
    ExtractError, ExtractReport, Extraction, Extractor, SkipReason, SkippedEntry,
    sanitize_entry_path,
};
pub use classify::{ClassifiedFile, DeviceGroup, FileRole, classify, roles_for};
pub use detect::{ArchiveKind, archive_stem, detect_kind, detect_kind_from_name};
