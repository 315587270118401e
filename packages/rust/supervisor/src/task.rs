//! In-process units: a tokio task with its own shutdown signal and heartbeat.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dumpsift_shared::{Heartbeat, Result, Shutdown, ShutdownTrigger, shutdown_channel};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::unit::{Health, Launcher, UnitProcess};

pub type UnitFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type UnitFactory = dyn Fn(Shutdown, Heartbeat) -> UnitFuture + Send + Sync;

/// Launches a unit by calling `factory` and spawning the future it returns.
#[derive(Clone)]
pub struct TaskLauncher {
    name: String,
    factory: Arc<UnitFactory>,
    heartbeat_timeout: Option<Duration>,
}

impl TaskLauncher {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Shutdown, Heartbeat) -> UnitFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
            heartbeat_timeout: None,
        }
    }

    /// Consider the task hung when it has not beaten for `timeout`.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Launcher for TaskLauncher {
    async fn launch(&self) -> Result<Box<dyn UnitProcess>> {
        let (trigger, shutdown) = shutdown_channel();
        let heartbeat = Heartbeat::new();
        let handle = tokio::spawn((self.factory)(shutdown, heartbeat.clone()));
        info!(unit = %self.name, "task started");

        Ok(Box::new(TaskProcess {
            name: self.name.clone(),
            handle: Some(handle),
            trigger,
            heartbeat,
            heartbeat_timeout: self.heartbeat_timeout,
            started: Instant::now(),
        }))
    }
}

struct TaskProcess {
    name: String,
    handle: Option<JoinHandle<Result<()>>>,
    trigger: ShutdownTrigger,
    heartbeat: Heartbeat,
    heartbeat_timeout: Option<Duration>,
    started: Instant,
}

#[async_trait]
impl UnitProcess for TaskProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn check(&mut self) -> Health {
        let Some(handle) = self.handle.as_mut() else {
            return Health::Exited("task already reaped".into());
        };
        if handle.is_finished() {
            let outcome = match handle.await {
                Ok(Ok(())) => "task returned".to_string(),
                Ok(Err(e)) => format!("task failed: {e}"),
                Err(e) => format!("task panicked: {e}"),
            };
            self.handle = None;
            return Health::Exited(outcome);
        }

        if let Some(timeout) = self.heartbeat_timeout {
            let age = self.heartbeat.age().unwrap_or_else(|| self.started.elapsed());
            if age > timeout {
                return Health::Unresponsive(format!("no heartbeat for {}s", age.as_secs()));
            }
        }
        Health::Healthy
    }

    async fn terminate(&mut self, grace: Duration) {
        self.trigger.trigger();
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => info!(unit = %self.name, "task stopped"),
            Err(_) => {
                warn!(unit = %self.name, "grace period over, aborting task");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_honours_shutdown() {
        let launcher = TaskLauncher::new("loop", |shutdown: Shutdown, heartbeat: Heartbeat| {
            Box::pin(async move {
                while !shutdown.idle(Duration::from_millis(10), &heartbeat).await {}
                Ok(())
            }) as UnitFuture
        });
        let mut process = launcher.launch().await.expect("launch");
        assert_eq!(process.check().await, Health::Healthy);

        process.terminate(Duration::from_secs(1)).await;
        assert!(matches!(process.check().await, Health::Exited(_)));
    }

    #[tokio::test]
    async fn silent_task_is_unresponsive() {
        let launcher = TaskLauncher::new("stuck", |_shutdown: Shutdown, _heartbeat: Heartbeat| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }) as UnitFuture
        })
        .with_heartbeat_timeout(Duration::from_millis(50));

        let mut process = launcher.launch().await.expect("launch");
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(matches!(process.check().await, Health::Unresponsive(_)));
        process.terminate(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn failed_task_reports_its_error() {
        let launcher = TaskLauncher::new("crash", |_s: Shutdown, _h: Heartbeat| {
            Box::pin(async move {
                Err(dumpsift_shared::DumpsiftError::Supervisor("boom".into()))
            }) as UnitFuture
        });
        let mut process = launcher.launch().await.expect("launch");
        tokio::time::sleep(Duration::from_millis(50)).await;
        match process.check().await {
            Health::Exited(reason) => assert!(reason.contains("boom")),
            other => panic!("expected exit, got {other:?}"),
        }
    }
}
