//! Recursive archive extraction into an ephemeral working tree.
//!
//! The top-level container is unpacked into a fresh [`TempDir`], then every
//! nested container found in the tree is expanded through a work queue into a
//! sibling directory named after its stem. There is no depth limit. A nested
//! container that cannot be opened is logged, recorded in the report and left
//! in place as a plain file; only the top-level container failing is an error.
//!
//! The [`TempDir`] is owned by the returned [`Extraction`], so the working
//! tree is removed when the extraction is dropped, on every exit path.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

use dumpsift_shared::{DumpsiftError, ExtractSection};
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::detect::{ArchiveKind, archive_stem, detect_kind, detect_kind_from_name, sniff_file};

/// Unix file-type bits for a symlink.
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Top-level extraction failure.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("corrupt archive {path:?}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("unsupported archive format: {path:?}")]
    UnsupportedFormat { path: PathBuf },

    #[error("archive is password protected: {path:?}")]
    PasswordProtected { path: PathBuf },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    /// Retrying the same archive gives the same result. Only I/O failures
    /// (disk full, temp dir unavailable) may clear up on their own.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl ToString) -> Self {
        Self::CorruptArchive {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

impl From<ExtractError> for DumpsiftError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Io { path, source } => DumpsiftError::io(path, source),
            other => DumpsiftError::Archive(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Why an entry was not written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Absolute path or `..` escaping the destination.
    Traversal,
    /// Symlink, hardlink, device or fifo.
    Special,
    /// Larger than `max_entry_bytes`.
    TooLarge,
    /// Would push the archive past `max_total_bytes`.
    TotalBudget,
    /// Encrypted and no candidate password worked.
    Encrypted,
    /// Entry header or data could not be read.
    Unreadable(String),
    /// A nested container that could not be expanded.
    NestedFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Container the entry lives in (file name only).
    pub container: String,
    pub entry: String,
    pub reason: SkipReason,
}

/// What happened during one extraction.
#[derive(Debug, Clone, Default)]
pub struct ExtractReport {
    pub files_written: usize,
    pub bytes_written: u64,
    pub nested_expanded: usize,
    pub traversal_rejected: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// An extracted tree. The working directory is deleted on drop.
#[derive(Debug)]
pub struct Extraction {
    _dir: TempDir,
    root: PathBuf,
    report: ExtractReport,
}

impl Extraction {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report(&self) -> &ExtractReport {
        &self.report
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Blocking archive extractor. Run it on a blocking thread from async code.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractSection,
}

impl Extractor {
    pub fn new(config: ExtractSection) -> Self {
        Self { config }
    }

    /// Extract `archive` and every container nested inside it.
    #[instrument(skip_all, fields(archive = %archive.display()))]
    pub fn extract(&self, archive: &Path) -> Result<Extraction, ExtractError> {
        let kind = detect_kind(archive)
            .map_err(|e| ExtractError::io(archive, e))?
            .ok_or_else(|| ExtractError::UnsupportedFormat {
                path: archive.to_path_buf(),
            })?;

        let dir = tempfile::Builder::new()
            .prefix("dumpsift-")
            .tempdir()
            .map_err(|e| ExtractError::io(&std::env::temp_dir(), e))?;
        let root = dir.path().to_path_buf();

        let mut run = Run::new(&self.config);
        run.unpack(kind, archive, &root)?;
        run.expand_nested(&root);

        info!(
            kind = kind.as_str(),
            files = run.report.files_written,
            nested = run.report.nested_expanded,
            skipped = run.report.skipped.len(),
            "archive extracted"
        );

        Ok(Extraction {
            _dir: dir,
            root,
            report: run.report,
        })
    }
}

/// Mutable state of one extraction.
struct Run<'a> {
    config: &'a ExtractSection,
    report: ExtractReport,
    /// Last password that opened something; tried first next time.
    password_hint: Option<String>,
}

/// Result of streaming one entry to disk.
enum Written {
    Done,
    OverCap,
}

impl<'a> Run<'a> {
    fn new(config: &'a ExtractSection) -> Self {
        Self {
            config,
            report: ExtractReport::default(),
            password_hint: None,
        }
    }

    fn unpack(&mut self, kind: ArchiveKind, src: &Path, dest: &Path) -> Result<(), ExtractError> {
        fs::create_dir_all(dest).map_err(|e| ExtractError::io(dest, e))?;
        match kind {
            ArchiveKind::Zip => self.unpack_zip(src, dest),
            ArchiveKind::Tar => {
                let file = File::open(src).map_err(|e| ExtractError::io(src, e))?;
                self.unpack_tar(BufReader::new(file), src, dest)
            }
            ArchiveKind::TarGz => {
                let file = File::open(src).map_err(|e| ExtractError::io(src, e))?;
                self.unpack_tar(GzDecoder::new(BufReader::new(file)), src, dest)
            }
            ArchiveKind::Gzip => self.unpack_gzip(src, dest),
            ArchiveKind::SevenZip | ArchiveKind::Rar => self.unpack_external(src, dest),
        }
    }

    // --- zip ---

    fn unpack_zip(&mut self, src: &Path, dest: &Path) -> Result<(), ExtractError> {
        let container = display_name(src);
        let file = File::open(src).map_err(|e| ExtractError::io(src, e))?;
        let mut zip =
            ZipArchive::new(BufReader::new(file)).map_err(|e| ExtractError::corrupt(src, e))?;

        let mut written = 0usize;
        let mut locked = 0usize;

        for i in 0..zip.len() {
            let header = match zip.by_index_raw(i) {
                Ok(entry) => ZipHeader {
                    name: entry.name().to_string(),
                    enclosed: entry.enclosed_name(),
                    is_dir: entry.is_dir(),
                    is_special: entry.unix_mode().is_some_and(|m| m & S_IFMT == S_IFLNK),
                    encrypted: entry.encrypted(),
                    size: entry.size(),
                },
                Err(e) => {
                    self.skip(&container, &format!("#{i}"), SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };

            let Some(rel) = header.enclosed else {
                self.reject_traversal(&container, &header.name);
                continue;
            };
            let target = dest.join(rel);

            if header.is_dir {
                fs::create_dir_all(&target).map_err(|e| ExtractError::io(&target, e))?;
                continue;
            }
            if header.is_special {
                self.skip(&container, &header.name, SkipReason::Special);
                continue;
            }
            if !self.admit(&container, &header.name, header.size) {
                continue;
            }

            let outcome = if header.encrypted {
                self.write_encrypted(&mut zip, i, &target)
            } else {
                match zip.by_index(i) {
                    Ok(mut entry) => self.write_entry(&mut entry, &target).map(Some),
                    Err(e) => Err(io::Error::other(e)),
                }
            };

            match outcome {
                Ok(Some(Written::Done)) => written += 1,
                Ok(Some(Written::OverCap)) => {
                    self.skip(&container, &header.name, SkipReason::TooLarge);
                }
                Ok(None) => {
                    locked += 1;
                    self.skip(&container, &header.name, SkipReason::Encrypted);
                }
                Err(e) => {
                    debug!(entry = %header.name, error = %e, "zip entry unreadable");
                    let _ = fs::remove_file(&target);
                    self.skip(&container, &header.name, SkipReason::Unreadable(e.to_string()));
                }
            }
        }

        if locked > 0 && written == 0 {
            return Err(ExtractError::PasswordProtected {
                path: src.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Try every candidate password on one entry. `Ok(None)` when none works.
    fn write_encrypted<R: Read + io::Seek>(
        &mut self,
        zip: &mut ZipArchive<R>,
        index: usize,
        target: &Path,
    ) -> io::Result<Option<Written>> {
        for password in self.candidate_passwords() {
            let mut entry = match zip.by_index_decrypt(index, password.as_bytes()) {
                Ok(entry) => entry,
                Err(ZipError::InvalidPassword) => continue,
                Err(e) => return Err(io::Error::other(e)),
            };
            // A wrong ZipCrypto password can pass the header check and only
            // fail on the CRC at the end of the stream.
            match self.write_entry(&mut entry, target) {
                Ok(written) => {
                    self.password_hint = Some(password);
                    return Ok(Some(written));
                }
                Err(_) => {
                    let _ = fs::remove_file(target);
                }
            }
        }
        Ok(None)
    }

    // --- tar / tar.gz ---

    fn unpack_tar<R: Read>(&mut self, reader: R, src: &Path, dest: &Path) -> Result<(), ExtractError> {
        let container = display_name(src);
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| ExtractError::corrupt(src, e))?;

        let mut seen_any = false;
        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) if !seen_any => return Err(ExtractError::corrupt(src, e)),
                Err(e) => {
                    // The stream is unusable past this point.
                    warn!(container = %container, error = %e, "tar stream truncated");
                    self.skip(&container, "<stream>", SkipReason::Unreadable(e.to_string()));
                    break;
                }
            };
            seen_any = true;

            let name = match entry.path() {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(e) => {
                    self.skip(&container, "<unnamed>", SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };
            let Some(rel) = sanitize_entry_path(&name) else {
                self.reject_traversal(&container, &name);
                continue;
            };
            let target = dest.join(rel);

            let kind = entry.header().entry_type();
            if kind.is_dir() {
                fs::create_dir_all(&target).map_err(|e| ExtractError::io(&target, e))?;
                continue;
            }
            if !kind.is_file() {
                self.skip(&container, &name, SkipReason::Special);
                continue;
            }
            if !self.admit(&container, &name, entry.size()) {
                continue;
            }
            match self.write_entry(&mut entry, &target) {
                Ok(Written::Done) => {}
                Ok(Written::OverCap) => self.skip(&container, &name, SkipReason::TooLarge),
                Err(e) => {
                    let _ = fs::remove_file(&target);
                    self.skip(&container, &name, SkipReason::Unreadable(e.to_string()));
                }
            }
        }
        Ok(())
    }

    // --- gzip ---

    /// A bare gzip stream holds one file. If that file is itself a container
    /// it gets the matching suffix so the nested pass picks it up.
    fn unpack_gzip(&mut self, src: &Path, dest: &Path) -> Result<(), ExtractError> {
        let name = display_name(src);
        let stem = archive_stem(&name);
        let target = dest.join(if stem == name { "content" } else { stem });

        let file = File::open(src).map_err(|e| ExtractError::io(src, e))?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        match self.write_entry(&mut decoder, &target) {
            Ok(Written::Done) => {}
            Ok(Written::OverCap) => {
                self.skip(&name, stem, SkipReason::TooLarge);
                return Ok(());
            }
            Err(e) => {
                let _ = fs::remove_file(&target);
                return Err(ExtractError::corrupt(src, e));
            }
        }

        let inner = target
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(detect_kind_from_name);
        if inner.is_none() {
            if let Ok(Some(kind)) = sniff_file(&target) {
                let renamed = target.with_file_name(format!("{stem}.{}", kind.as_str()));
                fs::rename(&target, &renamed).map_err(|e| ExtractError::io(&renamed, e))?;
            }
        }
        Ok(())
    }

    // --- 7z / rar ---

    fn unpack_external(&mut self, src: &Path, dest: &Path) -> Result<(), ExtractError> {
        let mut saw_password_prompt = false;
        let mut candidates = vec![String::new()];
        candidates.extend(self.candidate_passwords());

        for password in candidates {
            let output = Command::new(&self.config.seven_zip_bin)
                .arg("x")
                .arg("-y")
                .arg(format!("-p{password}"))
                .arg(format!("-o{}", dest.display()))
                .arg(src)
                .stdin(Stdio::null())
                .output();

            let output = match output {
                Ok(output) => output,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(bin = %self.config.seven_zip_bin, "7z binary not found");
                    return Err(ExtractError::UnsupportedFormat {
                        path: src.to_path_buf(),
                    });
                }
                Err(e) => return Err(ExtractError::io(src, e)),
            };

            if output.status.success() {
                if !password.is_empty() {
                    self.password_hint = Some(password);
                }
                return self.adopt_external(src, dest);
            }

            let diagnostics = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            let lower = diagnostics.to_ascii_lowercase();
            if lower.contains("wrong password") || lower.contains("encrypted") {
                saw_password_prompt = true;
                let _ = fs::remove_dir_all(dest);
                fs::create_dir_all(dest).map_err(|e| ExtractError::io(dest, e))?;
                continue;
            }

            let reason = diagnostics
                .lines()
                .find(|l| l.to_ascii_lowercase().contains("error"))
                .unwrap_or("7z exited with failure")
                .trim()
                .to_string();
            return Err(ExtractError::CorruptArchive {
                path: src.to_path_buf(),
                reason,
            });
        }

        if saw_password_prompt {
            Err(ExtractError::PasswordProtected {
                path: src.to_path_buf(),
            })
        } else {
            Err(ExtractError::corrupt(src, "no password candidates configured"))
        }
    }

    /// Apply the same rules to what the external tool wrote: no links, no
    /// oversized files, total budget.
    fn adopt_external(&mut self, src: &Path, dest: &Path) -> Result<(), ExtractError> {
        let container = display_name(src);
        for entry in WalkDir::new(dest).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.skip(&container, "<walk>", SkipReason::Unreadable(e.to_string()));
                    continue;
                }
            };
            let rel = entry
                .path()
                .strip_prefix(dest)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let _ = fs::remove_file(entry.path());
                self.skip(&container, &rel, SkipReason::Special);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if self.admit(&container, &rel, size) {
                self.report.files_written += 1;
                self.report.bytes_written += size;
            } else {
                fs::remove_file(entry.path()).map_err(|e| ExtractError::io(entry.path(), e))?;
            }
        }
        Ok(())
    }

    // --- nested ---

    fn expand_nested(&mut self, root: &Path) {
        let mut queue: VecDeque<PathBuf> = nested_archives_under(root).into();

        while let Some(archive) = queue.pop_front() {
            let name = display_name(&archive);
            let Some(kind) = detect_kind_from_name(&name) else {
                continue;
            };
            let dest = unique_sibling(&archive, archive_stem(&name));

            match self.unpack(kind, &archive, &dest) {
                Ok(()) => {
                    debug!(nested = %name, kind = kind.as_str(), "nested archive expanded");
                    self.report.nested_expanded += 1;
                    self.report.files_written = self.report.files_written.saturating_sub(1);
                    if let Err(e) = fs::remove_file(&archive) {
                        warn!(nested = %name, error = %e, "could not remove expanded archive");
                    }
                    queue.extend(nested_archives_under(&dest));
                }
                Err(e) => {
                    warn!(nested = %name, error = %e, "nested archive skipped");
                    let _ = fs::remove_dir_all(&dest);
                    let parent = archive
                        .parent()
                        .map(display_name)
                        .unwrap_or_default();
                    self.skip(&parent, &name, SkipReason::NestedFailed(e.to_string()));
                }
            }
        }
    }

    // --- helpers ---

    fn candidate_passwords(&self) -> Vec<String> {
        let mut out: Vec<String> = self.password_hint.iter().cloned().collect();
        for p in &self.config.passwords {
            if !out.contains(p) {
                out.push(p.clone());
            }
        }
        out
    }

    /// Check the declared size against both caps before writing.
    fn admit(&mut self, container: &str, entry: &str, size: u64) -> bool {
        if size > self.config.max_entry_bytes {
            self.skip(container, entry, SkipReason::TooLarge);
            return false;
        }
        if self.report.bytes_written.saturating_add(size) > self.config.max_total_bytes {
            self.skip(container, entry, SkipReason::TotalBudget);
            return false;
        }
        true
    }

    /// Stream one entry to `target`. Declared sizes can lie, so the caps are
    /// enforced again on the bytes actually read.
    fn write_entry(&mut self, reader: &mut dyn Read, target: &Path) -> io::Result<Written> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let remaining = self
            .config
            .max_total_bytes
            .saturating_sub(self.report.bytes_written);
        let limit = self.config.max_entry_bytes.min(remaining);

        let mut out = File::create(target)?;
        let copied = io::copy(&mut reader.take(limit.saturating_add(1)), &mut out)?;
        drop(out);

        if copied > limit {
            fs::remove_file(target)?;
            return Ok(Written::OverCap);
        }
        self.report.files_written += 1;
        self.report.bytes_written += copied;
        Ok(Written::Done)
    }

    fn reject_traversal(&mut self, container: &str, entry: &str) {
        warn!(container, entry, "path traversal entry rejected");
        self.report.traversal_rejected += 1;
        self.skip(container, entry, SkipReason::Traversal);
    }

    fn skip(&mut self, container: &str, entry: &str, reason: SkipReason) {
        debug!(container, entry, ?reason, "entry skipped");
        self.report.skipped.push(SkippedEntry {
            container: container.to_string(),
            entry: entry.to_string(),
            reason,
        });
    }
}

struct ZipHeader {
    name: String,
    enclosed: Option<PathBuf>,
    is_dir: bool,
    is_special: bool,
    encrypted: bool,
    size: u64,
}

/// Normalize an entry name to a relative path that stays inside the
/// destination. `None` for absolute paths and `..` escapes.
pub fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn nested_archives_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(detect_kind_from_name)
                .is_some()
        })
        .map(|e| e.into_path())
        .collect()
}

/// `parent/stem`, or `parent/stem_1`, `stem_2`... if taken.
fn unique_sibling(archive: &Path, stem: &str) -> PathBuf {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let mut candidate = parent.join(stem);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{stem}_{n}"));
        n += 1;
    }
    candidate
}
