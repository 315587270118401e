//! OS-process units: spawned with `tokio::process`, stopped over stdin.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dumpsift_shared::{DumpsiftError, Heartbeat, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::control::ControlMessage;
use crate::unit::{Health, Launcher, UnitProcess};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Launches a unit as a child process.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    heartbeat: Option<(PathBuf, Duration)>,
    health_url: Option<String>,
}

impl CommandLauncher {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            heartbeat: None,
            health_url: None,
        }
    }

    /// Consider the child hung when `path` is older than `timeout`.
    pub fn with_heartbeat_file(mut self, path: impl Into<PathBuf>, timeout: Duration) -> Self {
        self.heartbeat = Some((path.into(), timeout));
        self
    }

    /// Probe `url` with GET on every check; any 2xx is healthy.
    pub fn with_health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self) -> Result<Box<dyn UnitProcess>> {
        if let Some((path, _)) = &self.heartbeat {
            // A previous instance's file would make a hung start look alive.
            let _ = std::fs::remove_file(path);
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DumpsiftError::Supervisor(format!(
                    "failed to spawn {} ({}): {e}",
                    self.name,
                    self.program.display()
                ))
            })?;

        info!(unit = %self.name, pid = ?child.id(), "process started");

        let probe = match &self.health_url {
            Some(url) => Some((
                reqwest::Client::builder()
                    .timeout(PROBE_TIMEOUT)
                    .build()
                    .map_err(|e| DumpsiftError::Supervisor(format!("probe client: {e}")))?,
                url.clone(),
            )),
            None => None,
        };

        Ok(Box::new(ChildProcess {
            name: self.name.clone(),
            child,
            started: Instant::now(),
            heartbeat: self.heartbeat.clone(),
            probe,
        }))
    }
}

struct ChildProcess {
    name: String,
    child: Child,
    started: Instant,
    heartbeat: Option<(PathBuf, Duration)>,
    probe: Option<(reqwest::Client, String)>,
}

#[async_trait]
impl UnitProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn check(&mut self) -> Health {
        match self.child.try_wait() {
            Ok(Some(status)) => return Health::Exited(format!("process exited: {status}")),
            Ok(None) => {}
            Err(e) => return Health::Exited(format!("cannot query process: {e}")),
        }

        if let Some((path, timeout)) = &self.heartbeat {
            let age = Heartbeat::file_age(path).unwrap_or_else(|| self.started.elapsed());
            if age > *timeout {
                return Health::Unresponsive(format!("no heartbeat for {}s", age.as_secs()));
            }
        }

        if let Some((client, url)) = &self.probe {
            match client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    return Health::Unresponsive(format!("health probe: HTTP {}", resp.status()));
                }
                Err(e) => return Health::Unresponsive(format!("health probe: {e}")),
            }
        }

        Health::Healthy
    }

    async fn terminate(&mut self, grace: Duration) {
        if let Some(mut stdin) = self.child.stdin.take() {
            let line = ControlMessage::Shutdown.to_line();
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                debug!(unit = %self.name, error = %e, "could not send shutdown");
            }
            let _ = stdin.flush().await;
            // Dropping closes the pipe, which the child also treats as shutdown.
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!(unit = %self.name, %status, "process stopped"),
            Ok(Err(e)) => warn!(unit = %self.name, error = %e, "wait failed"),
            Err(_) => {
                warn!(unit = %self.name, grace_secs = grace.as_secs(), "grace period over, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(unit = %self.name, error = %e, "kill failed");
                }
            }
        }
    }
}
