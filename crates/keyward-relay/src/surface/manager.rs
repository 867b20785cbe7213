//! Singleton approver surface manager.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::storage::StateStore;

use super::{SurfaceError, SurfaceEvent, SurfaceId, SurfaceLauncher, SurfaceSpec};

/// Tracks the single live approver surface.
///
/// The manager exclusively owns the surface handle: nothing else opens,
/// closes, or reuses a surface.
pub struct SurfaceManager {
    launcher: Arc<dyn SurfaceLauncher>,
    spec: SurfaceSpec,
    events: mpsc::Sender<SurfaceEvent>,
    store: StateStore,
    current: RwLock<Option<SurfaceId>>,
}

impl SurfaceManager {
    pub fn new(
        launcher: Arc<dyn SurfaceLauncher>,
        spec: SurfaceSpec,
        events: mpsc::Sender<SurfaceEvent>,
        store: StateStore,
    ) -> Self {
        Self {
            launcher,
            spec,
            events,
            store,
            current: RwLock::new(None),
        }
    }

    /// Return the live surface, launching one if none is open.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn open_if_absent(&self) -> Result<SurfaceId, SurfaceError> {
        let mut current = self.current.write().await;
        if let Some(id) = current.as_ref() {
            debug!(surface_id = %id, "Reusing open approver surface");
            return Ok(id.clone());
        }

        let surface_id = self.launcher.launch(&self.spec, self.events.clone()).await?;
        if let Err(e) = self.store.set_surface_handle(&surface_id).await {
            warn!(surface_id = %surface_id, error = %e, "Failed to persist surface handle");
        }
        *current = Some(surface_id.clone());

        info!(
            surface_id = %surface_id,
            width = self.spec.width,
            height = self.spec.height,
            view = %self.spec.entry_view,
            "Approver surface opened"
        );
        Ok(surface_id)
    }

    /// Close the live surface, if any. Returns the closed surface id.
    pub async fn close_current(&self) -> Option<SurfaceId> {
        let surface_id = self.current.write().await.take()?;
        self.forget_persisted_handle().await;

        if let Err(e) = self.launcher.close(&surface_id).await {
            warn!(surface_id = %surface_id, error = %e, "Failed to close approver surface");
        } else {
            info!(surface_id = %surface_id, "Approver surface closed by relay");
        }
        Some(surface_id)
    }

    /// Handle a close notification.
    ///
    /// Returns `true` when the closed surface was the tracked one, i.e. the
    /// user dismissed it; closures of already-forgotten surfaces are ignored.
    pub async fn on_closed(&self, surface_id: &str) -> bool {
        let mut current = self.current.write().await;
        if current.as_deref() != Some(surface_id) {
            drop(current);
            debug!(surface_id, "Ignoring close of untracked surface");
            return false;
        }
        *current = None;
        drop(current);

        self.forget_persisted_handle().await;
        info!(surface_id, "Approver surface dismissed");
        true
    }

    pub async fn is_current(&self, surface_id: &str) -> bool {
        self.current.read().await.as_deref() == Some(surface_id)
    }

    pub async fn current(&self) -> Option<SurfaceId> {
        self.current.read().await.clone()
    }

    async fn forget_persisted_handle(&self) {
        if let Err(e) = self.store.clear_surface_handle().await {
            warn!(error = %e, "Failed to clear persisted surface handle");
        }
    }
}
