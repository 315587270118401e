//! Process supervision for the dumpsift background units.
//!
//! The [`Supervisor`] drives the same state machine over any [`Launcher`]:
//! child processes ([`CommandLauncher`]) in production, in-process tasks
//! ([`TaskLauncher`]) for embedding and tests.

mod control;
mod process;
mod runtime;
mod task;
mod unit;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dumpsift_shared::{AppConfig, expand_home};

pub use control::{ControlMessage, listen_signals, listen_stdin};
pub use process::CommandLauncher;
pub use runtime::{StatusReport, Supervisor, SupervisorHandle, UnitStatus, read_status_file};
pub use task::{TaskLauncher, UnitFuture};
pub use unit::{Health, Launcher, UnitProcess, UnitState};

pub const STATUS_FILE_NAME: &str = "supervisor-status.json";

/// Runtime settings for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub health_check_interval: Duration,
    pub restart_delay: Duration,
    pub max_restarts: u32,
    pub stable_after: Duration,
    pub shutdown_grace: Duration,
    pub heartbeat_timeout: Duration,
    /// Where the status and heartbeat files live. `None` writes no files.
    pub state_dir: Option<PathBuf>,
}

impl From<&AppConfig> for SupervisorConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.supervisor;
        Self {
            health_check_interval: Duration::from_secs(s.health_check_interval_secs.max(1)),
            restart_delay: Duration::from_secs(s.restart_delay_secs),
            max_restarts: s.max_restarts,
            stable_after: Duration::from_secs(s.stable_after_secs),
            shutdown_grace: Duration::from_secs(s.shutdown_grace_secs),
            heartbeat_timeout: Duration::from_secs(s.heartbeat_timeout_secs),
            state_dir: Some(expand_home(&config.storage.state_dir)),
        }
    }
}

impl SupervisorConfig {
    pub fn status_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join(STATUS_FILE_NAME))
    }

    pub fn heartbeat_path(&self, unit: &str) -> Option<PathBuf> {
        self.state_dir.as_deref().map(|d| heartbeat_file(d, unit))
    }
}

/// Heartbeat file a supervised loop should write, given the state directory.
pub fn heartbeat_file(state_dir: &Path, unit: &str) -> PathBuf {
    state_dir.join(format!("{unit}.heartbeat"))
}

/// The standard units: `intake` and `enrichment` as child processes of
/// `exe`, and `api` when a command is configured.
///
/// `config_path` is forwarded to the children so they read the same file.
pub fn default_units(
    app: &AppConfig,
    sup: &SupervisorConfig,
    exe: &Path,
    config_path: Option<&Path>,
) -> Vec<(String, Arc<dyn Launcher>)> {
    let mut units: Vec<(String, Arc<dyn Launcher>)> = Vec::new();

    let child = |name: &str, subcommand: &str| -> Arc<dyn Launcher> {
        let mut args = Vec::new();
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args.push(subcommand.to_string());
        args.push("--supervised".to_string());

        let mut launcher = CommandLauncher::new(name, exe, args);
        if let Some(beat) = sup.heartbeat_path(name) {
            launcher = launcher.with_heartbeat_file(beat, sup.heartbeat_timeout);
        }
        Arc::new(launcher)
    };

    if app.supervisor.intake_enabled {
        units.push(("intake".into(), child("intake", "intake")));
    }
    if app.supervisor.enrichment_enabled {
        units.push(("enrichment".into(), child("enrichment", "enrich")));
    }

    let api = &app.supervisor.api;
    if let Some((program, args)) = api.command.split_first() {
        let mut launcher = CommandLauncher::new("api", program, args.to_vec());
        if !api.health_url.is_empty() {
            launcher = launcher.with_health_url(&api.health_url);
        }
        units.push(("api".into(), Arc::new(launcher)));
    }

    units
}
