//! The supervision loop and its control handle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dumpsift_shared::{DumpsiftError, Result, Shutdown};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::SupervisorConfig;
use crate::unit::{Health, Launcher, UnitProcess, UnitState};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Snapshot of one unit, as reported by the handle and the status file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub state: UnitState,
    pub pid: Option<u32>,
    pub consecutive_failures: u32,
    pub restarts: u32,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub uptime_secs: Option<u64>,
}

/// Content of `supervisor-status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub updated_at: DateTime<Utc>,
    pub supervisor_pid: u32,
    pub units: Vec<UnitStatus>,
}

/// Read the status file written by a running supervisor.
pub fn read_status_file(path: &Path) -> Result<StatusReport> {
    let content = std::fs::read_to_string(path).map_err(|e| DumpsiftError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| DumpsiftError::Supervisor(format!("bad status file {}: {e}", path.display())))
}

fn write_status_file(path: &Path, report: &StatusReport) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(report).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Command {
    Start(String, oneshot::Sender<Result<()>>),
    Stop(String, oneshot::Sender<Result<()>>),
    Restart(String, oneshot::Sender<Result<()>>),
    Status(String, oneshot::Sender<Option<UnitStatus>>),
    Report(oneshot::Sender<Vec<UnitStatus>>),
    Shutdown(oneshot::Sender<()>),
}

/// Control surface of a running [`Supervisor`]. Cheap to clone.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
}

fn gone() -> DumpsiftError {
    DumpsiftError::Supervisor("supervisor is not running".into())
}

impl SupervisorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).await.map_err(|_| gone())?;
        rx.await.map_err(|_| gone())
    }

    /// Start a stopped or permanently failed unit. Resets its failure counter.
    pub async fn start(&self, name: &str) -> Result<()> {
        self.request(|tx| Command::Start(name.to_string(), tx)).await?
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.request(|tx| Command::Stop(name.to_string(), tx)).await?
    }

    /// Stop and relaunch a unit now, whatever its state.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.request(|tx| Command::Restart(name.to_string(), tx)).await?
    }

    pub async fn status(&self, name: &str) -> Result<Option<UnitStatus>> {
        self.request(|tx| Command::Status(name.to_string(), tx)).await
    }

    pub async fn report(&self) -> Result<Vec<UnitStatus>> {
        self.request(Command::Report).await
    }

    /// Stop every unit in reverse start order and end the supervisor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Unit {
    name: String,
    launcher: Arc<dyn Launcher>,
    process: Option<Box<dyn UnitProcess>>,
    state: UnitState,
    pid: Option<u32>,
    consecutive_failures: u32,
    restarts: u32,
    /// Order of the latest launch; shutdown goes highest first.
    start_seq: u64,
    started_at: Option<Instant>,
    healthy_since: Option<Instant>,
    restart_at: Option<Instant>,
    last_check_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Unit {
    fn status(&self) -> UnitStatus {
        UnitStatus {
            name: self.name.clone(),
            state: self.state,
            pid: self.pid,
            consecutive_failures: self.consecutive_failures,
            restarts: self.restarts,
            last_check_at: self.last_check_at,
            last_error: self.last_error.clone(),
            uptime_secs: self
                .started_at
                .filter(|_| self.process.is_some())
                .map(|t| t.elapsed().as_secs()),
        }
    }
}

/// Keeps a set of units alive: periodic checks, delayed capped restarts,
/// ordered shutdown.
pub struct Supervisor {
    config: SupervisorConfig,
    units: Vec<Unit>,
    seq: u64,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            units: Vec::new(),
            seq: 0,
        }
    }

    /// Register a unit. Units are started in registration order.
    pub fn add_unit(&mut self, name: impl Into<String>, launcher: Arc<dyn Launcher>) {
        self.units.push(Unit {
            name: name.into(),
            launcher,
            process: None,
            state: UnitState::Stopped,
            pid: None,
            consecutive_failures: 0,
            restarts: 0,
            start_seq: 0,
            started_at: None,
            healthy_since: None,
            restart_at: None,
            last_check_at: None,
            last_error: None,
        });
    }

    pub fn unit_names(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.name.as_str()).collect()
    }

    /// Start every unit and supervise until `shutdown` fires or a handle asks
    /// for shutdown.
    pub fn spawn(self, shutdown: Shutdown) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(self.run(rx, shutdown));
        (SupervisorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, shutdown: Shutdown) {
        info!(units = ?self.unit_names(), "supervisor starting");
        for i in 0..self.units.len() {
            self.launch(i).await;
        }
        self.write_status();

        let mut next_check = Instant::now() + self.config.health_check_interval;
        let mut commands_open = true;

        loop {
            let wake = self.next_wake(next_check);
            tokio::select! {
                _ = shutdown.requested() => break,
                cmd = rx.recv(), if commands_open => match cmd {
                    Some(Command::Shutdown(reply)) => {
                        self.stop_all().await;
                        self.write_status();
                        let _ = reply.send(());
                        return;
                    }
                    Some(cmd) => self.handle(cmd).await,
                    None => commands_open = false,
                },
                _ = tokio::time::sleep_until(wake) => {}
            }

            let now = Instant::now();
            if now >= next_check {
                self.check_all().await;
                next_check = Instant::now() + self.config.health_check_interval;
            }
            self.restart_due(Instant::now()).await;
            self.write_status();
        }

        self.stop_all().await;
        self.write_status();
    }

    fn next_wake(&self, next_check: Instant) -> Instant {
        self.units
            .iter()
            .filter_map(|u| u.restart_at)
            .fold(next_check, Instant::min)
    }

    fn find(&self, name: &str) -> Result<usize> {
        self.units
            .iter()
            .position(|u| u.name == name)
            .ok_or_else(|| DumpsiftError::Supervisor(format!("unknown unit '{name}'")))
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Start(name, reply) => {
                let result = match self.find(&name) {
                    Ok(i) if self.units[i].process.is_some() => Err(DumpsiftError::Supervisor(
                        format!("unit '{name}' is already running"),
                    )),
                    Ok(i) => {
                        info!(unit = %name, "operator start");
                        self.units[i].consecutive_failures = 0;
                        self.launch(i).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Stop(name, reply) => {
                let result = match self.find(&name) {
                    Ok(i) => {
                        info!(unit = %name, "operator stop");
                        self.stop_unit(i).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Restart(name, reply) => {
                let result = match self.find(&name) {
                    Ok(i) => {
                        info!(unit = %name, "operator restart");
                        self.stop_unit(i).await;
                        self.units[i].consecutive_failures = 0;
                        self.launch(i).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Status(name, reply) => {
                let status = self.units.iter().find(|u| u.name == name).map(Unit::status);
                let _ = reply.send(status);
            }
            Command::Report(reply) => {
                let _ = reply.send(self.units.iter().map(Unit::status).collect());
            }
            Command::Shutdown(_) => {}
        }
        self.write_status();
    }

    async fn launch(&mut self, i: usize) {
        self.seq += 1;
        let seq = self.seq;
        let launched = self.units[i].launcher.launch().await;
        let unit = &mut self.units[i];
        unit.restart_at = None;

        match launched {
            Ok(process) => {
                unit.pid = process.pid();
                unit.process = Some(process);
                unit.state = UnitState::Starting;
                unit.start_seq = seq;
                unit.started_at = Some(Instant::now());
                unit.healthy_since = None;
                debug!(unit = %unit.name, pid = ?unit.pid, "unit launched");
            }
            Err(e) => {
                error!(unit = %unit.name, error = %e, "launch failed");
                self.fail(i, e.to_string()).await;
            }
        }
    }

    async fn check_all(&mut self) {
        let stable_after = self.config.stable_after;
        for i in 0..self.units.len() {
            let Some(process) = self.units[i].process.as_mut() else {
                continue;
            };
            let health = process.check().await;
            let now = Instant::now();
            let unit = &mut self.units[i];
            unit.last_check_at = Some(Utc::now());

            match health {
                Health::Healthy => {
                    if unit.state == UnitState::Starting {
                        info!(unit = %unit.name, "unit healthy");
                        unit.state = UnitState::Healthy;
                        unit.healthy_since = Some(now);
                    }
                    let stable = unit
                        .healthy_since
                        .is_some_and(|since| now.duration_since(since) >= stable_after);
                    if stable && unit.consecutive_failures > 0 {
                        info!(unit = %unit.name, "unit stable, failure counter reset");
                        unit.consecutive_failures = 0;
                    }
                }
                Health::Exited(reason) | Health::Unresponsive(reason) => {
                    self.fail(i, reason).await;
                }
            }
        }
    }

    /// Record a failure: tear down what is left and either schedule a restart
    /// or give up on the unit.
    async fn fail(&mut self, i: usize, reason: String) {
        let grace = self.config.shutdown_grace;
        let max_restarts = self.config.max_restarts;
        let restart_delay = self.config.restart_delay;

        let unit = &mut self.units[i];
        if let Some(mut process) = unit.process.take() {
            process.terminate(grace).await;
        }
        unit.pid = None;
        unit.healthy_since = None;
        unit.consecutive_failures += 1;
        unit.last_error = Some(reason.clone());

        if unit.consecutive_failures > max_restarts {
            error!(
                unit = %unit.name,
                failures = unit.consecutive_failures,
                reason = %reason,
                "unit failed permanently"
            );
            unit.state = UnitState::FailedPermanently;
            unit.restart_at = None;
        } else {
            warn!(
                unit = %unit.name,
                failures = unit.consecutive_failures,
                delay_ms = restart_delay.as_millis() as u64,
                reason = %reason,
                "unit failed, restarting"
            );
            unit.state = UnitState::Restarting;
            unit.restart_at = Some(Instant::now() + restart_delay);
        }
    }

    async fn restart_due(&mut self, now: Instant) {
        for i in 0..self.units.len() {
            let unit = &mut self.units[i];
            if unit.state == UnitState::Restarting && unit.restart_at.is_some_and(|t| t <= now) {
                unit.restarts += 1;
                self.launch(i).await;
            }
        }
    }

    async fn stop_unit(&mut self, i: usize) {
        let grace = self.config.shutdown_grace;
        let unit = &mut self.units[i];
        if let Some(mut process) = unit.process.take() {
            process.terminate(grace).await;
        }
        unit.state = UnitState::Stopped;
        unit.pid = None;
        unit.restart_at = None;
        unit.healthy_since = None;
    }

    async fn stop_all(&mut self) {
        let mut order: Vec<usize> = (0..self.units.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.units[i].start_seq));
        for i in order {
            if self.units[i].process.is_some() || self.units[i].state == UnitState::Restarting {
                info!(unit = %self.units[i].name, "stopping unit");
            }
            self.stop_unit(i).await;
        }
        info!("all units stopped");
    }

    fn write_status(&self) {
        let Some(path) = self.config.status_path() else {
            return;
        };
        let report = StatusReport {
            updated_at: Utc::now(),
            supervisor_pid: std::process::id(),
            units: self.units.iter().map(Unit::status).collect(),
        };
        if let Err(e) = write_status_file(&path, &report) {
            debug!(path = %path.display(), error = %e, "status write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use dumpsift_shared::{Heartbeat, shutdown_channel};

    use super::*;
    use crate::task::{TaskLauncher, UnitFuture};

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            health_check_interval: Duration::from_millis(20),
            restart_delay: Duration::from_millis(60),
            max_restarts: 3,
            stable_after: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(200),
            heartbeat_timeout: Duration::from_secs(60),
            state_dir: None,
        }
    }

    /// A unit that runs until shutdown, crashing on its first `crashes` launches.
    fn flaky(crashes: u32, launches: Arc<AtomicU32>) -> Arc<dyn Launcher> {
        Arc::new(TaskLauncher::new("flaky", move |shutdown: Shutdown, heartbeat: Heartbeat| {
            let n = launches.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < crashes {
                    return Err(DumpsiftError::Supervisor("crash".into()));
                }
                while !shutdown.idle(Duration::from_millis(10), &heartbeat).await {}
                Ok(())
            }) as UnitFuture
        }))
    }

    #[tokio::test]
    async fn crash_yields_exactly_one_restart() {
        let launches = Arc::new(AtomicU32::new(0));
        let mut sup = Supervisor::new(fast_config());
        sup.add_unit("worker", flaky(1, Arc::clone(&launches)));
        let (handle, task) = sup.spawn(Shutdown::never());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let status = handle.status("worker").await.expect("status").expect("unit");
        assert_eq!(status.restarts, 1);
        assert_eq!(launches.load(Ordering::SeqCst), 2);
        assert_eq!(status.state, UnitState::Healthy);

        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");
    }

    #[tokio::test]
    async fn repeated_crashes_end_in_permanent_failure() {
        let launches = Arc::new(AtomicU32::new(0));
        let mut sup = Supervisor::new(fast_config());
        sup.add_unit("worker", flaky(u32::MAX, Arc::clone(&launches)));
        let (handle, task) = sup.spawn(Shutdown::never());

        tokio::time::sleep(Duration::from_millis(800)).await;
        let status = handle.status("worker").await.expect("status").expect("unit");
        assert_eq!(status.state, UnitState::FailedPermanently);
        assert_eq!(status.restarts, 3);
        assert_eq!(launches.load(Ordering::SeqCst), 4);

        // No further restarts happen on their own.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(launches.load(Ordering::SeqCst), 4);

        // An operator restart revives it with a fresh counter.
        handle.restart("worker").await.expect("restart");
        assert_eq!(launches.load(Ordering::SeqCst), 5);
        let status = handle.status("worker").await.expect("status").expect("unit");
        assert!(matches!(
            status.state,
            UnitState::Starting | UnitState::Restarting
        ));

        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");
    }

    #[tokio::test]
    async fn operator_stop_and_start() {
        let launches = Arc::new(AtomicU32::new(0));
        let mut sup = Supervisor::new(fast_config());
        sup.add_unit("worker", flaky(0, Arc::clone(&launches)));
        let (handle, task) = sup.spawn(Shutdown::never());

        handle.stop("worker").await.expect("stop");
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = handle.status("worker").await.expect("status").expect("unit");
        assert_eq!(status.state, UnitState::Stopped);
        assert_eq!(launches.load(Ordering::SeqCst), 1);

        handle.start("worker").await.expect("start");
        assert!(handle.start("worker").await.is_err());
        assert!(handle.stop("nope").await.is_err());
        assert_eq!(launches.load(Ordering::SeqCst), 2);

        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");
    }

    #[tokio::test]
    async fn shutdown_stops_in_reverse_start_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut sup = Supervisor::new(fast_config());
        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            sup.add_unit(
                name,
                Arc::new(TaskLauncher::new(name, move |shutdown: Shutdown, hb: Heartbeat| {
                    let order = Arc::clone(&order);
                    Box::pin(async move {
                        while !shutdown.idle(Duration::from_millis(10), &hb).await {}
                        if let Ok(mut o) = order.lock() {
                            o.push(name);
                        }
                        Ok(())
                    }) as UnitFuture
                })),
            );
        }

        let (trigger, shutdown) = shutdown_channel();
        let (_handle, task) = sup.spawn(shutdown);
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();
        task.await.expect("join");

        let order = order.lock().expect("lock").clone();
        assert_eq!(order, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn status_file_is_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = fast_config();
        config.state_dir = Some(dir.path().to_path_buf());
        let status_path = config.status_path().expect("path");

        let mut sup = Supervisor::new(config);
        sup.add_unit("worker", flaky(0, Arc::new(AtomicU32::new(0))));
        let (handle, task) = sup.spawn(Shutdown::never());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = read_status_file(&status_path).expect("status file");
        assert_eq!(report.units.len(), 1);
        assert_eq!(report.units[0].name, "worker");
        assert_eq!(report.units[0].state, UnitState::Healthy);

        handle.shutdown().await.expect("shutdown");
        task.await.expect("join");
        let report = read_status_file(&status_path).expect("status file");
        assert_eq!(report.units[0].state, UnitState::Stopped);
    }
}
