//! Control messages between the supervisor and its child processes, and the
//! signal listeners that turn OS signals into a shutdown request.
//!
//! A supervised child reads JSON lines from stdin. `{"type":"shutdown"}` or
//! end of input asks it to stop after its current stage.

use dumpsift_shared::ShutdownTrigger;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Message written to a child's stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Shutdown,
}

impl ControlMessage {
    /// One JSON line, newline included.
    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{json}\n"),
            Err(_) => "{\"type\":\"shutdown\"}\n".to_string(),
        }
    }
}

/// Trigger `trigger` when a shutdown message arrives on stdin or stdin closes.
pub fn listen_stdin(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<ControlMessage>(line.trim()) {
                    Ok(ControlMessage::Shutdown) => {
                        info!("shutdown requested by supervisor");
                        break;
                    }
                    Err(e) => debug!(error = %e, "ignoring control line"),
                },
                Ok(None) => {
                    info!("control channel closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "control channel read failed");
                    break;
                }
            }
        }
        trigger.trigger();
    })
}

/// Trigger `trigger` on SIGINT (and SIGTERM on unix).
pub fn listen_signals(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        trigger.trigger();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_message_serializes_correctly() {
        assert_eq!(ControlMessage::Shutdown.to_line(), "{\"type\":\"shutdown\"}\n");
    }

    #[test]
    fn shutdown_message_deserializes() {
        let msg: ControlMessage = serde_json::from_str(r#"{"type":"shutdown"}"#).expect("parse");
        assert_eq!(msg, ControlMessage::Shutdown);
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"reload"}"#).is_err());
    }
}
