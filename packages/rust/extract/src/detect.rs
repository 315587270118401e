//! Archive kind detection.
//!
//! Suffix first (`.tar.gz`/`.tgz` before `.gz`), then magic bytes for files
//! whose name says nothing. Nested entries are matched by suffix only, so
//! office documents and other zip-based formats stay files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes needed to see a ustar header.
const SNIFF_LEN: usize = 512;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const SEVEN_ZIP_MAGIC: &[u8] = &[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C];
const RAR_MAGIC: &[u8] = b"Rar!\x1A\x07";
const USTAR_OFFSET: usize = 257;

/// Container format of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    /// A standalone gzip stream wrapping a single file.
    Gzip,
    SevenZip,
    Rar,
}

impl ArchiveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::Gzip => "gz",
            Self::SevenZip => "7z",
            Self::Rar => "rar",
        }
    }

    /// Formats unpacked by the external 7-Zip binary.
    pub fn needs_external_tool(self) -> bool {
        matches!(self, Self::SevenZip | Self::Rar)
    }
}

/// Detect by file name suffix, case-insensitively.
pub fn detect_kind_from_name(name: &str) -> Option<ArchiveKind> {
    let lower = name.trim_end_matches('/').to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        return Some(ArchiveKind::TarGz);
    }
    let kind = match lower.rsplit_once('.')?.1 {
        "gz" => ArchiveKind::Gzip,
        "tar" => ArchiveKind::Tar,
        "zip" => ArchiveKind::Zip,
        "7z" => ArchiveKind::SevenZip,
        "rar" => ArchiveKind::Rar,
        _ => return None,
    };
    Some(kind)
}

/// Sniff by magic bytes. Tar is only recognised with the full 512-byte header.
pub fn sniff_kind_from_header(header: &[u8]) -> Option<ArchiveKind> {
    if header.starts_with(ZIP_MAGIC) || header.starts_with(ZIP_EMPTY_MAGIC) {
        Some(ArchiveKind::Zip)
    } else if header.starts_with(GZIP_MAGIC) {
        Some(ArchiveKind::Gzip)
    } else if header.starts_with(SEVEN_ZIP_MAGIC) {
        Some(ArchiveKind::SevenZip)
    } else if header.starts_with(RAR_MAGIC) {
        Some(ArchiveKind::Rar)
    } else if header
        .get(USTAR_OFFSET..USTAR_OFFSET + 5)
        .is_some_and(|magic| magic == b"ustar")
    {
        Some(ArchiveKind::Tar)
    } else {
        None
    }
}

/// Read up to [`SNIFF_LEN`] bytes from the start of `path` and sniff them.
pub fn sniff_file(path: &Path) -> io::Result<Option<ArchiveKind>> {
    let mut header = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(sniff_kind_from_header(&header))
}

/// Suffix first, magic bytes as fallback.
pub fn detect_kind(path: &Path) -> io::Result<Option<ArchiveKind>> {
    let by_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(detect_kind_from_name);
    match by_name {
        Some(kind) => Ok(Some(kind)),
        None => sniff_file(path),
    }
}

/// File name without its archive suffix (`logs.tar.gz` → `logs`).
pub fn archive_stem(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    for suffix in [".tar.gz", ".tgz"] {
        if lower.ends_with(suffix) {
            return &name[..name.len() - suffix.len()];
        }
    }
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}
