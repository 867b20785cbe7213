//! Surfaces hosted inside the embedding process.
//!
//! Each launch hands a [`SurfaceSession`] to whoever holds the session
//! receiver (an embedded UI, or a test driving the approval flow).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use keyward_core::protocol::{SurfaceMessage, SurfaceReply};

use super::{SurfaceError, SurfaceEvent, SurfaceId, SurfaceLauncher, SurfaceSpec};

type LiveSurfaces = Arc<RwLock<HashMap<SurfaceId, mpsc::Sender<SurfaceEvent>>>>;

/// Launcher that exposes each surface as an in-process session.
pub struct InProcessLauncher {
    sessions: mpsc::UnboundedSender<SurfaceSession>,
    live: LiveSurfaces,
}

impl InProcessLauncher {
    /// Create a launcher and the receiver new sessions are delivered on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SurfaceSession>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions,
                live: Arc::new(RwLock::new(HashMap::new())),
            },
            rx,
        )
    }
}

#[async_trait]
impl SurfaceLauncher for InProcessLauncher {
    async fn launch(
        &self,
        _spec: &SurfaceSpec,
        events: mpsc::Sender<SurfaceEvent>,
    ) -> Result<SurfaceId, SurfaceError> {
        let surface_id = uuid::Uuid::new_v4().to_string();
        let session = SurfaceSession {
            surface_id: surface_id.clone(),
            live: Arc::clone(&self.live),
        };

        self.live
            .write()
            .await
            .insert(surface_id.clone(), events);

        if self.sessions.send(session).is_err() {
            self.live.write().await.remove(&surface_id);
            return Err(SurfaceError::LaunchFailed {
                reason: "no surface host is listening".to_string(),
            });
        }
        Ok(surface_id)
    }

    async fn close(&self, surface_id: &str) -> Result<(), SurfaceError> {
        // Called from the relay loop, which also drains `events`; awaiting
        // capacity here would block the loop on itself.
        let events = self.live.write().await.remove(surface_id);
        if let Some(events) = events {
            let closed = SurfaceEvent::Closed {
                surface_id: surface_id.to_string(),
            };
            if let Err(TrySendError::Full(closed)) = events.try_send(closed) {
                tokio::spawn(async move {
                    let _ = events.send(closed).await;
                });
            }
        }
        Ok(())
    }
}

/// One open in-process surface.
pub struct SurfaceSession {
    surface_id: SurfaceId,
    live: LiveSurfaces,
}

impl SurfaceSession {
    pub fn id(&self) -> &str {
        &self.surface_id
    }

    /// Send a message to the relay. Returns `false` once the surface is closed.
    pub async fn send(&self, message: SurfaceMessage) -> bool {
        let events = self.live.read().await.get(&self.surface_id).cloned();
        let Some(events) = events else {
            debug!(surface_id = %self.surface_id, "Surface closed; message not sent");
            return false;
        };
        events
            .send(SurfaceEvent::Message {
                surface_id: self.surface_id.clone(),
                message,
            })
            .await
            .is_ok()
    }

    pub async fn reply(&self, reply: SurfaceReply) -> bool {
        self.send(SurfaceMessage::Reply(reply)).await
    }

    /// Close the surface as the user would, without deciding.
    pub async fn close(&self) {
        let events = self.live.write().await.remove(&self.surface_id);
        if let Some(events) = events {
            let _ = events
                .send(SurfaceEvent::Closed {
                    surface_id: self.surface_id.clone(),
                })
                .await;
        }
    }
}
