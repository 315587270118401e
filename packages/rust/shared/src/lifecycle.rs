//! Cooperative shutdown and liveness primitives for long-running loops.
//!
//! Loops receive a [`Shutdown`] to learn when to stop between stages, and a
//! [`Heartbeat`] they touch as they make progress. The supervisor reads the
//! heartbeat (in memory for in-process units, from a file for child
//! processes) to tell a hung loop from a busy one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Longest a loop goes without touching its heartbeat, idle or busy.
pub const BEAT_EVERY: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Sending half of a shutdown signal. Clones fire the same signal, so
/// several listeners can share one receiver.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Ask every linked [`Shutdown`] to stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half of a shutdown signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    /// Sender kept alive by receivers that nobody can trigger.
    _pinned: Option<Arc<watch::Sender<bool>>>,
}

/// Create a linked trigger/receiver pair.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownTrigger { tx: Arc::new(tx) },
        Shutdown { rx, _pinned: None },
    )
}

impl Shutdown {
    /// A signal that never fires, for one-shot runs.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _pinned: Some(Arc::new(tx)),
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn requested(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            // Trigger dropped without firing: nothing will ever ask us to stop.
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `total`, beating `heartbeat` along the way.
    ///
    /// Returns `true` if shutdown was requested before the time elapsed.
    pub async fn idle(&self, total: Duration, heartbeat: &Heartbeat) -> bool {
        let deadline = tokio::time::Instant::now() + total;
        loop {
            heartbeat.beat().await;
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return self.is_requested();
            }
            let step = (deadline - now).min(BEAT_EVERY);
            tokio::select! {
                _ = self.requested() => return true,
                _ = tokio::time::sleep(step) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Last-progress timestamp of a loop, optionally mirrored to a file.
#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    last_ms: Arc<AtomicI64>,
    file: Option<Arc<PathBuf>>,
}

impl Heartbeat {
    /// In-memory heartbeat for in-process units.
    pub fn new() -> Self {
        Self::default()
    }

    /// Heartbeat that also writes the timestamp to `path` on every beat.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            last_ms: Arc::default(),
            file: Some(Arc::new(path.into())),
        }
    }

    pub async fn beat(&self) {
        let now = Utc::now().timestamp_millis();
        self.last_ms.store(now, Ordering::Relaxed);

        if let Some(path) = &self.file {
            if let Err(e) = write_atomic(path, &now.to_string()).await {
                tracing::debug!(path = %path.display(), error = %e, "heartbeat write failed");
            }
        }
    }

    /// Keep beating every `every` from a background task until the returned
    /// [`Pulse`] is dropped. Used around blocking work that cannot beat itself.
    pub fn pulse(&self, every: Duration) -> Pulse {
        let heartbeat = self.clone();
        let every = every.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                heartbeat.beat().await;
            }
        });
        Pulse { task }
    }

    /// Time since the last beat, or `None` if it never beat.
    pub fn age(&self) -> Option<Duration> {
        match self.last_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(age_since(ms)),
        }
    }

    /// Age of a heartbeat file written by another process.
    pub fn file_age(path: &Path) -> Option<Duration> {
        let content = std::fs::read_to_string(path).ok()?;
        let ms = content.trim().parse::<i64>().ok()?;
        Some(age_since(ms))
    }
}

/// Background beating started by [`Heartbeat::pulse`]; stops on drop.
#[must_use = "the pulse stops as soon as it is dropped"]
#[derive(Debug)]
pub struct Pulse {
    task: JoinHandle<()>,
}

impl Drop for Pulse {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Readers never see a half-written heartbeat. Each write stages into its
/// own file so overlapping beats cannot rename each other's partial output.
async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    static STAGED: AtomicU64 = AtomicU64::new(0);
    let mut staging = path.as_os_str().to_owned();
    staging.push(format!(".{}.tmp", STAGED.fetch_add(1, Ordering::Relaxed)));
    tokio::fs::write(&staging, content).await?;
    tokio::fs::rename(&staging, path).await
}

fn age_since(ms: i64) -> Duration {
    let delta = Utc::now().timestamp_millis().saturating_sub(ms);
    Duration::from_millis(u64::try_from(delta).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_interrupts_idle() {
        let (trigger, shutdown) = shutdown_channel();
        let heartbeat = Heartbeat::new();

        let waiter = {
            let shutdown = shutdown.clone();
            let heartbeat = heartbeat.clone();
            tokio::spawn(async move { shutdown.idle(Duration::from_secs(60), &heartbeat).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();

        let interrupted = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("idle returned")
            .expect("task joined");
        assert!(interrupted);
        assert!(shutdown.is_requested());
        assert!(heartbeat.age().is_some());
    }

    #[tokio::test]
    async fn any_trigger_clone_stops_the_receiver() {
        let (trigger, shutdown) = shutdown_channel();
        let from_signal = trigger.clone();
        drop(trigger);

        assert!(!shutdown.is_requested());
        from_signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), shutdown.requested())
            .await
            .expect("receiver saw the clone's signal");
    }

    #[tokio::test]
    async fn idle_runs_to_completion_without_signal() {
        let shutdown = Shutdown::never();
        let interrupted = shutdown
            .idle(Duration::from_millis(10), &Heartbeat::new())
            .await;
        assert!(!interrupted);
    }

    #[tokio::test]
    async fn heartbeat_file_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "dumpsift_hb_{}_{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let hb = Heartbeat::with_file(&path);
        assert!(hb.age().is_none());
        hb.beat().await;
        let age = Heartbeat::file_age(&path).expect("file written");
        assert!(age < Duration::from_secs(5));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn pulse_beats_until_dropped() {
        let heartbeat = Heartbeat::new();
        let pulse = heartbeat.pulse(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let age = heartbeat.age().expect("pulse beat");
        assert!(age < Duration::from_millis(150), "stale pulse: {age:?}");

        drop(pulse);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let age = heartbeat.age().expect("beat recorded");
        assert!(age >= Duration::from_millis(150), "pulse kept beating: {age:?}");
    }
}
