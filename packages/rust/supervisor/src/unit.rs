//! The contract between the supervisor and whatever it supervises.

use std::time::Duration;

use async_trait::async_trait;
use dumpsift_shared::Result;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Launched, not yet seen healthy.
    Starting,
    Healthy,
    /// Failed a check; waiting out the restart delay.
    Restarting,
    /// Stopped by an operator or by shutdown.
    Stopped,
    /// Too many consecutive failures; only an operator restart revives it.
    FailedPermanently,
}

impl UnitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
            Self::FailedPermanently => "failed_permanently",
        }
    }
}

/// Result of one liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The process or task is gone.
    Exited(String),
    /// Still running but not making progress or not answering probes.
    Unresponsive(String),
}

/// Starts one instance of a unit.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn UnitProcess>>;
}

/// A running instance of a unit.
#[async_trait]
pub trait UnitProcess: Send {
    /// OS process id, when there is one.
    fn pid(&self) -> Option<u32>;

    async fn check(&mut self) -> Health;

    /// Ask the unit to stop, force it after `grace`.
    async fn terminate(&mut self, grace: Duration);
}
