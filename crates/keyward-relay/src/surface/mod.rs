//! Approver surface lifecycle.
//!
//! The surface is the separate, ephemeral UI where a human approves or
//! declines interactive requests. At most one is open at a time; closing it
//! is the only way pending requests get cancelled.

mod in_process;
mod launcher;
mod manager;

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use keyward_core::config::SurfaceConfig;
use keyward_core::protocol::SurfaceMessage;

pub use in_process::{InProcessLauncher, SurfaceSession};
pub use launcher::ProcessLauncher;
pub use manager::SurfaceManager;

/// Identifier of a launched surface.
pub type SurfaceId = String;

/// Events a launched surface reports back to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Message {
        surface_id: SurfaceId,
        message: SurfaceMessage,
    },
    Closed {
        surface_id: SurfaceId,
    },
}

/// Fixed launch parameters for every surface.
#[derive(Debug, Clone)]
pub struct SurfaceSpec {
    pub width: u32,
    pub height: u32,
    pub entry_view: String,
    /// State store the surface reads pending requests from.
    pub db_path: Option<PathBuf>,
}

impl SurfaceSpec {
    pub fn from_config(config: &SurfaceConfig, db_path: Option<PathBuf>) -> Self {
        Self {
            width: config.width,
            height: config.height,
            entry_view: config.entry_view.clone(),
            db_path,
        }
    }
}

/// Opens and closes approver surfaces.
#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    /// Open a new surface that reports on `events` until it closes.
    async fn launch(
        &self,
        spec: &SurfaceSpec,
        events: mpsc::Sender<SurfaceEvent>,
    ) -> Result<SurfaceId, SurfaceError>;

    /// Close a surface. Closing an unknown surface is not an error.
    ///
    /// Runs on the relay loop, which is the consumer of `events`, so it must
    /// not wait for capacity on that queue.
    async fn close(&self, surface_id: &str) -> Result<(), SurfaceError>;
}

/// Surface lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("{reason}")]
    LaunchFailed { reason: String },
}
