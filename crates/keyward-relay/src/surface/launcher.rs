//! Approver surfaces running as child processes.
//!
//! The surface program is started with its viewport and entry view on the
//! command line, reads the pending request from the state store on its own,
//! and writes NDJSON surface messages on stdout. Process exit is the close
//! event.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};

use keyward_core::protocol::parse_surface_line;

use super::{SurfaceError, SurfaceEvent, SurfaceId, SurfaceLauncher, SurfaceSpec};

/// Launches each surface as a child process.
pub struct ProcessLauncher {
    command: PathBuf,
    args: Vec<String>,
    /// Kill switches for running surfaces keyed by surface id.
    running: Arc<RwLock<HashMap<SurfaceId, oneshot::Sender<()>>>>,
}

impl ProcessLauncher {
    pub fn new(command: PathBuf, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of surface processes still running.
    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }
}

#[async_trait]
impl SurfaceLauncher for ProcessLauncher {
    async fn launch(
        &self,
        spec: &SurfaceSpec,
        events: mpsc::Sender<SurfaceEvent>,
    ) -> Result<SurfaceId, SurfaceError> {
        let surface_id = uuid::Uuid::new_v4().to_string();

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg("--width")
            .arg(spec.width.to_string())
            .arg("--height")
            .arg(spec.height.to_string())
            .arg("--view")
            .arg(&spec.entry_view)
            .env("KEYWARD_SURFACE_ID", &surface_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref db_path) = spec.db_path {
            cmd.env("KEYWARD_DB_PATH", db_path);
        }

        info!(
            command = %self.command.display(),
            surface_id = %surface_id,
            "Spawning approver surface"
        );
        let mut child = cmd.spawn().map_err(|e| SurfaceError::LaunchFailed {
            reason: format!("{}: {e}", self.command.display()),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SurfaceError::LaunchFailed {
                reason: "Failed to capture stdout".to_string(),
            })?;

        // Surface messages
        let sid = surface_id.clone();
        let message_tx = events.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_surface_line(&line) {
                    Ok(message) => {
                        let event = SurfaceEvent::Message {
                            surface_id: sid.clone(),
                            message,
                        };
                        if message_tx.send(event).await.is_err() {
                            warn!(surface_id = %sid, "Relay stopped listening to surface");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(surface_id = %sid, error = %e, "Dropping malformed surface frame");
                    }
                }
            }
            debug!(surface_id = %sid, "Surface stdout reader finished");
        });

        // Diagnostics
        if let Some(stderr) = child.stderr.take() {
            let sid = surface_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(surface_id = %sid, "surface stderr: {}", line);
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        self.running
            .write()
            .await
            .insert(surface_id.clone(), kill_tx);

        // Exit watcher
        let sid = surface_id.clone();
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let killed = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => info!(surface_id = %sid, ?status, "Approver surface exited"),
                        Err(e) => warn!(surface_id = %sid, error = %e, "Error waiting for surface"),
                    }
                    false
                }
                _ = kill_rx => true,
            };
            if killed && let Err(e) = child.kill().await {
                warn!(surface_id = %sid, error = %e, "Failed to kill approver surface");
            }

            // Replies written just before exit are forwarded before the close.
            let _ = reader.await;
            running.write().await.remove(&sid);
            let _ = events.send(SurfaceEvent::Closed { surface_id: sid }).await;
        });

        Ok(surface_id)
    }

    async fn close(&self, surface_id: &str) -> Result<(), SurfaceError> {
        let kill = self.running.write().await.remove(surface_id);
        if let Some(kill) = kill {
            // The watcher may already be reaping an exited process.
            let _ = kill.send(());
        }
        Ok(())
    }
}
