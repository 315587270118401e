//! Archive intake loop: watch a directory, turn each archive into devices.
//!
//! One archive at a time, oldest first:
//! `Idle → Extracting → Classifying → Parsing → Persisting → Cleanup → Idle`.
//! Extractor rejections go to `<watch>/rejected/`; archives whose devices
//! could not be persisted stay put and are retried until `max_attempts`,
//! then go to `<watch>/failed/`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use dumpsift_extract::{DeviceGroup, Extraction, Extractor, classify};
use dumpsift_shared::{DumpsiftError, Heartbeat, IntakeConfig, Result, Shutdown};
use dumpsift_storage::{CommitOutcome, Storage, UploadCounts, UploadStatus, UploadTicket};
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use crate::dedup::build_bundle;
use crate::harvest::{Harvest, harvest_device};

pub const REJECTED_DIR: &str = "rejected";
pub const FAILED_DIR: &str = "failed";

/// Suffixes of files still being written by an uploader.
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".partial", ".tmp", ".crdownload", ".filepart"];

// ---------------------------------------------------------------------------
// Stages and progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeStage {
    Idle,
    Extracting,
    Classifying,
    Parsing,
    Persisting,
    Cleanup,
}

impl IntakeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Classifying => "classifying",
            Self::Parsing => "parsing",
            Self::Persisting => "persisting",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for IntakeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one archive attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Completed,
    /// The extractor refused the archive; retrying cannot help.
    Rejected(String),
    /// Something transient failed. `quarantined` once attempts ran out.
    Failed { error: String, quarantined: bool },
    /// Shutdown was requested between stages.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub archive_name: String,
    pub upload_id: String,
    pub attempt: u32,
    pub counts: UploadCounts,
    pub outcome: IngestOutcome,
    pub elapsed: Duration,
}

/// Progress callback for one archive.
pub trait IntakeProgress: Send + Sync {
    fn stage(&self, archive: &str, stage: IntakeStage);
    fn devices_found(&self, total: usize);
    fn device_done(&self, name: &str, outcome: CommitOutcome);
    fn done(&self, report: &IngestReport);
}

/// No-op progress reporter for the background loop and tests.
pub struct SilentProgress;

impl IntakeProgress for SilentProgress {
    fn stage(&self, _archive: &str, _stage: IntakeStage) {}
    fn devices_found(&self, _total: usize) {}
    fn device_done(&self, _name: &str, _outcome: CommitOutcome) {}
    fn done(&self, _report: &IngestReport) {}
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// What happens to the archive file after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Watched archive: deleted on success, quarantined on rejection.
    Consume,
    /// One-shot ingest: the file is never touched.
    Keep,
}

pub struct IntakeLoop {
    config: IntakeConfig,
    storage: Arc<Storage>,
    extractor: Extractor,
}

impl IntakeLoop {
    pub fn new(config: IntakeConfig, storage: Arc<Storage>) -> Self {
        let extractor = Extractor::new(config.extract.clone());
        Self {
            config,
            storage,
            extractor,
        }
    }

    /// Poll the watch directory until shutdown is requested.
    #[instrument(skip_all, fields(watch_dir = %self.config.watch_dir.display()))]
    pub async fn run(&self, shutdown: Shutdown, heartbeat: Heartbeat) -> Result<()> {
        self.prepare_dirs()?;
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            "intake loop started"
        );

        loop {
            heartbeat.beat().await;
            if shutdown.is_requested() {
                break;
            }
            match self.poll_once(&shutdown, &heartbeat).await {
                Ok(0) => {}
                Ok(n) => debug!(archives = n, "poll finished"),
                Err(e) => warn!(error = %e, "poll failed"),
            }
            if shutdown.idle(self.config.poll_interval, &heartbeat).await {
                break;
            }
        }

        info!("intake loop stopped");
        Ok(())
    }

    /// Process every settled archive currently in the watch directory.
    /// Returns how many were attempted.
    pub async fn poll_once(&self, shutdown: &Shutdown, heartbeat: &Heartbeat) -> Result<usize> {
        self.prepare_dirs()?;
        let mut attempted = 0;
        for path in self.candidates()? {
            if shutdown.is_requested() {
                break;
            }
            if !self.settled(&path).await {
                debug!(archive = %path.display(), "archive still growing, skipped");
                continue;
            }
            self.process_archive(&path, Disposition::Consume, shutdown, heartbeat, &SilentProgress)
                .await?;
            attempted += 1;
        }
        Ok(attempted)
    }

    /// Ingest a single archive outside the watch directory. The file is left
    /// where it is whatever the outcome.
    pub async fn ingest(&self, path: &Path, progress: &dyn IntakeProgress) -> Result<IngestReport> {
        if !path.is_file() {
            return Err(DumpsiftError::validation(format!(
                "not a file: {}",
                path.display()
            )));
        }
        self.process_archive(
            path,
            Disposition::Keep,
            &Shutdown::never(),
            &Heartbeat::new(),
            progress,
        )
        .await
    }

    fn prepare_dirs(&self) -> Result<()> {
        for dir in [
            self.config.watch_dir.clone(),
            self.config.watch_dir.join(REJECTED_DIR),
            self.config.watch_dir.join(FAILED_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| DumpsiftError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Regular, visible, complete files in the watch directory, oldest first.
    fn candidates(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.watch_dir;
        let entries = std::fs::read_dir(dir).map_err(|e| DumpsiftError::io(dir, e))?;

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DumpsiftError::io(dir, e))?;
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.starts_with('.') || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, entry.path()));
        }
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Two size samples `settle` apart must agree.
    async fn settled(&self, path: &Path) -> bool {
        if self.config.settle.is_zero() {
            return true;
        }
        let size = |p: &Path| std::fs::metadata(p).map(|m| m.len()).ok();
        let before = size(path);
        tokio::time::sleep(self.config.settle).await;
        before.is_some() && before == size(path)
    }

    #[instrument(skip_all, fields(archive = %path.display()))]
    async fn process_archive(
        &self,
        path: &Path,
        disposition: Disposition,
        shutdown: &Shutdown,
        heartbeat: &Heartbeat,
        progress: &dyn IntakeProgress,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let archive_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let ticket = self.storage.begin_upload(&archive_name, size).await?;
        info!(attempt = ticket.attempts, size, "archive picked up");

        let mut attempt = Attempt {
            path,
            archive_name: &archive_name,
            ticket: &ticket,
            disposition,
            progress,
            counts: UploadCounts::default(),
        };
        let outcome = self.run_stages(&mut attempt, shutdown, heartbeat).await?;
        let outcome = self.settle_outcome(&attempt, outcome).await?;

        self.stage(&attempt, IntakeStage::Idle);
        let report = IngestReport {
            archive_name: archive_name.clone(),
            upload_id: ticket.id.clone(),
            attempt: ticket.attempts,
            counts: attempt.counts,
            outcome,
            elapsed: started.elapsed(),
        };
        info!(
            outcome = ?report.outcome,
            devices = report.counts.devices,
            skipped = report.counts.skipped_devices,
            credentials = report.counts.credentials,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "archive finished"
        );
        progress.done(&report);
        Ok(report)
    }

    /// Everything between pickup and cleanup. Only upload bookkeeping errors
    /// escape as `Err`; every other failure becomes an outcome.
    async fn run_stages(
        &self,
        attempt: &mut Attempt<'_>,
        shutdown: &Shutdown,
        heartbeat: &Heartbeat,
    ) -> Result<IngestOutcome> {
        // Extracting
        self.stage(attempt, IntakeStage::Extracting);
        let extractor = self.extractor.clone();
        let archive = attempt.path.to_path_buf();
        let extracted = self
            .blocking_stage(heartbeat, move || extractor.extract(&archive))
            .await;
        let extraction: Extraction = match extracted {
            Ok(Ok(extraction)) => extraction,
            Ok(Err(e)) if e.is_deterministic() => return Ok(IngestOutcome::Rejected(e.to_string())),
            Ok(Err(e)) => return Ok(failed(e)),
            Err(join) => return Ok(failed(format!("extraction task failed: {join}"))),
        };
        heartbeat.beat().await;
        if shutdown.is_requested() {
            return Ok(IngestOutcome::Interrupted);
        }

        // Classifying
        self.stage(attempt, IntakeStage::Classifying);
        let root = extraction.root().to_path_buf();
        let name = attempt.archive_name.to_string();
        let groups = match self.blocking_stage(heartbeat, move || classify(&root, &name)).await {
            Ok(Ok(groups)) => groups,
            Ok(Err(e)) => return Ok(failed(format!("classification failed: {e}"))),
            Err(join) => return Ok(failed(format!("classification task failed: {join}"))),
        };
        attempt.progress.devices_found(groups.len());
        heartbeat.beat().await;
        if shutdown.is_requested() {
            return Ok(IngestOutcome::Interrupted);
        }

        // Parsing
        self.stage(attempt, IntakeStage::Parsing);
        let parsed: Vec<(DeviceGroup, Harvest)> = match self
            .blocking_stage(heartbeat, move || {
                groups
                    .into_iter()
                    .map(|g| {
                        let harvest = harvest_device(&g);
                        (g, harvest)
                    })
                    .collect()
            })
            .await
        {
            Ok(parsed) => parsed,
            Err(join) => return Ok(failed(format!("parsing task failed: {join}"))),
        };
        heartbeat.beat().await;
        if shutdown.is_requested() {
            return Ok(IngestOutcome::Interrupted);
        }

        // Persisting: runs to completion once started.
        self.stage(attempt, IntakeStage::Persisting);
        for (group, harvest) in parsed {
            let bundle = build_bundle(
                attempt.archive_name,
                Some(&attempt.ticket.id),
                &group,
                harvest,
            );
            match self.storage.commit_device(&bundle).await {
                Ok(CommitOutcome::Inserted) => {
                    attempt.counts.devices += 1;
                    attempt.counts.credentials += bundle.credentials.len() as u32;
                    attempt.counts.wallets += bundle.wallets.len() as u32;
                    attempt.counts.cards += bundle.cards.len() as u32;
                    attempt.progress.device_done(&group.name, CommitOutcome::Inserted);
                }
                Ok(CommitOutcome::Skipped) => {
                    attempt.counts.skipped_devices += 1;
                    attempt.progress.device_done(&group.name, CommitOutcome::Skipped);
                }
                Err(e) => {
                    warn!(device = %group.name, error = %e, "device commit failed");
                    return Ok(failed(format!("device {}: {e}", group.name)));
                }
            }
            heartbeat.beat().await;
        }
        self.storage
            .complete_upload(&attempt.ticket.id, &attempt.counts)
            .await?;

        // Cleanup: the extraction tree goes with the TempDir.
        self.stage(attempt, IntakeStage::Cleanup);
        drop(extraction);
        if attempt.disposition == Disposition::Consume {
            if let Err(e) = std::fs::remove_file(attempt.path) {
                warn!(error = %e, "could not delete processed archive");
            }
        }
        Ok(IngestOutcome::Completed)
    }

    /// Run `work` on the blocking pool while a pulse keeps the heartbeat
    /// fresh, so a long extraction is not mistaken for a hung loop.
    async fn blocking_stage<T, F>(
        &self,
        heartbeat: &Heartbeat,
        work: F,
    ) -> std::result::Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _pulse = heartbeat.pulse(self.config.heartbeat_every);
        tokio::task::spawn_blocking(work).await
    }

    /// Record a non-success outcome and move the archive if it is done for.
    async fn settle_outcome(
        &self,
        attempt: &Attempt<'_>,
        outcome: IngestOutcome,
    ) -> Result<IngestOutcome> {
        let ticket = attempt.ticket;
        match outcome {
            IngestOutcome::Rejected(reason) => {
                warn!(reason = %reason, "archive rejected");
                self.storage
                    .fail_upload(&ticket.id, UploadStatus::Rejected, &reason)
                    .await?;
                self.quarantine(attempt, REJECTED_DIR);
                Ok(IngestOutcome::Rejected(reason))
            }
            IngestOutcome::Failed { error, .. } => {
                self.storage
                    .fail_upload(&ticket.id, UploadStatus::Failed, &error)
                    .await?;
                let quarantined = ticket.attempts >= self.config.max_attempts;
                if quarantined {
                    warn!(attempts = ticket.attempts, error = %error, "giving up on archive");
                    self.quarantine(attempt, FAILED_DIR);
                } else {
                    warn!(attempts = ticket.attempts, error = %error, "archive will be retried");
                }
                Ok(IngestOutcome::Failed { error, quarantined })
            }
            IngestOutcome::Interrupted => {
                info!("interrupted by shutdown, archive kept for the next run");
                self.storage
                    .fail_upload(&ticket.id, UploadStatus::Failed, "interrupted by shutdown")
                    .await?;
                Ok(IngestOutcome::Interrupted)
            }
            IngestOutcome::Completed => Ok(IngestOutcome::Completed),
        }
    }

    fn quarantine(&self, attempt: &Attempt<'_>, subdir: &str) {
        if attempt.disposition == Disposition::Keep {
            return;
        }
        let dir = self.config.watch_dir.join(subdir);
        let mut target = dir.join(attempt.archive_name);
        if target.exists() {
            let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
            target = dir.join(format!("{stamp}-{}", attempt.archive_name));
        }
        match std::fs::rename(attempt.path, &target) {
            Ok(()) => info!(to = %target.display(), "archive moved"),
            Err(e) => warn!(to = %target.display(), error = %e, "could not move archive"),
        }
    }

    fn stage(&self, attempt: &Attempt<'_>, stage: IntakeStage) {
        debug!(archive = %attempt.archive_name, %stage, "intake stage");
        attempt.progress.stage(attempt.archive_name, stage);
    }
}

/// Per-archive state threaded through the stages.
struct Attempt<'a> {
    path: &'a Path,
    archive_name: &'a str,
    ticket: &'a UploadTicket,
    disposition: Disposition,
    progress: &'a dyn IntakeProgress,
    counts: UploadCounts,
}

fn failed(error: impl ToString) -> IngestOutcome {
    IngestOutcome::Failed {
        error: error.to_string(),
        quarantined: false,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use dumpsift_shared::{AppConfig, DeviceId};
    use dumpsift_storage::EntityTable;
    use uuid::Uuid;
    use zip::write::SimpleFileOptions;

    use super::*;

    const PASSWORDS: &str = "\
URL: https://mail.example.com/login
Username: alice
Password: hunter2
===============
URL: https://mail.example.com/login
Username: alice
Password: hunter2
===============
URL: https://bank.example.org/
Username: alice@example.org
Password: s3cret
";

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start file");
            writer.write_all(data).expect("write entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    fn log_archive() -> Vec<u8> {
        zip_bytes(&[
            ("US[ABC123]/Passwords.txt", PASSWORDS.as_bytes()),
            (
                "US[ABC123]/System.txt",
                b"Computer name: DESKTOP-1\nCountry: US\n",
            ),
        ])
    }

    async fn setup() -> (tempfile::TempDir, IntakeLoop, Arc<Storage>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = std::env::temp_dir().join(format!("dumpsift_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&db).await.expect("open db"));

        let mut config = IntakeConfig::from(&AppConfig::default());
        config.watch_dir = dir.path().join("incoming");
        config.settle = Duration::ZERO;
        config.max_attempts = 2;
        let intake = IntakeLoop::new(config, Arc::clone(&storage));
        intake.prepare_dirs().expect("dirs");
        (dir, intake, storage)
    }

    fn drop_archive(intake: &IntakeLoop, name: &str, bytes: &[u8]) -> PathBuf {
        let path = intake.config.watch_dir.join(name);
        std::fs::write(&path, bytes).expect("write archive");
        path
    }

    #[tokio::test]
    async fn watched_archive_is_ingested_and_deleted() {
        let (_dir, intake, storage) = setup().await;
        let path = drop_archive(&intake, "logs.zip", &log_archive());

        let n = intake
            .poll_once(&Shutdown::never(), &Heartbeat::new())
            .await
            .expect("poll");
        assert_eq!(n, 1);
        assert!(!path.exists());

        let device = DeviceId::derive("logs.zip", "US[ABC123]");
        assert!(storage.device_exists(device.as_str()).await.expect("exists"));
        let all = storage
            .count_for_device(EntityTable::Credentials, device.as_str(), false)
            .await
            .expect("count");
        let canonical = storage
            .count_for_device(EntityTable::Credentials, device.as_str(), true)
            .await
            .expect("count");
        assert_eq!(all, 3);
        assert_eq!(canonical, 2);

        let uploads = storage.recent_uploads(5).await.expect("uploads");
        assert_eq!(uploads[0].status, "completed");
        assert_eq!(uploads[0].device_count, 1);
    }

    #[tokio::test]
    async fn reingest_skips_known_devices() {
        let (dir, intake, storage) = setup().await;
        let outside = dir.path().join("logs.zip");
        std::fs::write(&outside, log_archive()).expect("write");

        let first = intake.ingest(&outside, &SilentProgress).await.expect("ingest");
        assert_eq!(first.outcome, IngestOutcome::Completed);
        assert_eq!(first.counts.devices, 1);
        assert!(outside.exists());

        let second = intake.ingest(&outside, &SilentProgress).await.expect("ingest");
        assert_eq!(second.outcome, IngestOutcome::Completed);
        assert_eq!(second.counts.devices, 0);
        assert_eq!(second.counts.skipped_devices, 1);

        let device = DeviceId::derive("logs.zip", "US[ABC123]");
        let canonical = storage
            .count_for_device(EntityTable::Credentials, device.as_str(), true)
            .await
            .expect("count");
        assert_eq!(canonical, 2);
    }

    #[tokio::test]
    async fn corrupt_archive_is_rejected() {
        let (_dir, intake, storage) = setup().await;
        let mut bytes = b"PK\x03\x04".to_vec();
        bytes.extend_from_slice(&[0xAB; 64]);
        let path = drop_archive(&intake, "broken.zip", &bytes);

        intake
            .poll_once(&Shutdown::never(), &Heartbeat::new())
            .await
            .expect("poll");

        assert!(!path.exists());
        assert!(intake.config.watch_dir.join(REJECTED_DIR).join("broken.zip").exists());
        let uploads = storage.recent_uploads(5).await.expect("uploads");
        assert_eq!(uploads[0].status, "rejected");
    }

    #[tokio::test]
    async fn persistence_failure_retries_then_moves_to_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("store.db");
        let storage = Arc::new(Storage::open(&db).await.expect("open db"));

        // Every device insert aborts, so each attempt fails while persisting.
        let conn = libsql::Builder::new_local(&db)
            .build()
            .await
            .expect("db")
            .connect()
            .expect("connect");
        conn.execute(
            "CREATE TRIGGER reject_devices BEFORE INSERT ON devices
             BEGIN SELECT RAISE(ABORT, 'disk is full'); END",
            libsql::params![],
        )
        .await
        .expect("trigger");

        let mut config = IntakeConfig::from(&AppConfig::default());
        config.watch_dir = dir.path().join("incoming");
        config.settle = Duration::ZERO;
        config.max_attempts = 3;
        let intake = IntakeLoop::new(config, Arc::clone(&storage));
        intake.prepare_dirs().expect("dirs");
        let path = drop_archive(&intake, "logs.zip", &log_archive());

        for attempt in 1..=2u32 {
            intake
                .poll_once(&Shutdown::never(), &Heartbeat::new())
                .await
                .expect("poll");
            assert!(path.exists(), "archive kept after attempt {attempt}");

            let uploads = storage.recent_uploads(5).await.expect("uploads");
            assert_eq!(uploads.len(), 1);
            assert_eq!(uploads[0].status, "failed");
            assert_eq!(uploads[0].attempts, attempt);
            assert!(uploads[0].last_error.as_deref().is_some_and(|e| e.contains("US[ABC123]")));
        }

        intake
            .poll_once(&Shutdown::never(), &Heartbeat::new())
            .await
            .expect("poll");
        assert!(!path.exists());
        assert!(intake.config.watch_dir.join(FAILED_DIR).join("logs.zip").exists());

        let uploads = storage.recent_uploads(5).await.expect("uploads");
        assert_eq!(uploads[0].status, "failed");
        assert_eq!(uploads[0].attempts, 3);
        assert!(uploads[0].last_error.is_some());

        let device = DeviceId::derive("logs.zip", "US[ABC123]");
        assert!(!storage.device_exists(device.as_str()).await.expect("exists"));
    }

    #[tokio::test]
    async fn long_blocking_stage_keeps_heartbeat_fresh() {
        let (dir, mut intake, _storage) = setup().await;
        intake.config.heartbeat_every = Duration::from_millis(20);
        let beat_file = dir.path().join("intake.heartbeat");
        let heartbeat = Heartbeat::with_file(&beat_file);
        let hung_after = Duration::from_millis(150);

        let stage = intake.blocking_stage(&heartbeat, || {
            std::thread::sleep(Duration::from_millis(500));
        });
        tokio::pin!(stage);

        let mut stamps = Vec::new();
        loop {
            tokio::select! {
                joined = &mut stage => {
                    joined.expect("stage joined");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let age = Heartbeat::file_age(&beat_file).expect("heartbeat written");
                    assert!(age < hung_after, "heartbeat went stale mid-stage: {age:?}");
                    let stamp = std::fs::read_to_string(&beat_file).expect("read heartbeat");
                    stamps.push(stamp.trim().parse::<i64>().expect("timestamp"));
                }
            }
        }

        assert!(stamps.len() >= 3, "stage should outlive the hang threshold");
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "stamps did not advance: {stamps:?}");
    }

    #[tokio::test]
    async fn partial_and_hidden_files_are_ignored() {
        let (_dir, intake, _storage) = setup().await;
        drop_archive(&intake, ".hidden.zip", &log_archive());
        drop_archive(&intake, "upload.zip.part", &log_archive());
        std::fs::create_dir_all(intake.config.watch_dir.join("nested")).expect("mkdir");

        assert!(intake.candidates().expect("list").is_empty());
    }

    #[tokio::test]
    async fn oldest_archive_comes_first() {
        let (_dir, intake, _storage) = setup().await;
        let old = drop_archive(&intake, "b.zip", &log_archive());
        std::thread::sleep(Duration::from_millis(20));
        let new = drop_archive(&intake, "a.zip", &log_archive());

        let old_time = std::fs::metadata(&old).and_then(|m| m.modified()).expect("mtime");
        let new_time = std::fs::metadata(&new).and_then(|m| m.modified()).expect("mtime");
        if old_time < new_time {
            assert_eq!(intake.candidates().expect("list"), vec![old, new]);
        }
    }

    #[tokio::test]
    async fn pending_shutdown_processes_nothing() {
        let (_dir, intake, _storage) = setup().await;
        let path = drop_archive(&intake, "logs.zip", &log_archive());
        let (trigger, shutdown) = dumpsift_shared::shutdown_channel();
        trigger.trigger();

        let n = intake
            .poll_once(&shutdown, &Heartbeat::new())
            .await
            .expect("poll");
        assert_eq!(n, 0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn loop_exits_on_shutdown() {
        let (_dir, intake, _storage) = setup().await;
        let (trigger, shutdown) = dumpsift_shared::shutdown_channel();
        let heartbeat = Heartbeat::new();

        let run = tokio::spawn(async move { intake.run(shutdown, heartbeat).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("loop stopped")
            .expect("join");
        assert!(result.is_ok());
    }
}
