//! Page bridge.
//!
//! The page-side client of the relay. Each call gets a fresh correlation
//! id and resolves with the first reply carrying that id; the fields that
//! identify the page come from the bridge's own [`PageContext`], never from
//! the caller.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use keyward_core::protocol::{OutboundResponse, PageEnvelope, Params, ReplyEnvelope, RequestKind};

/// Bridge errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Relay link closed")]
    LinkClosed,
}

/// What the bridge observed about the page it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub origin: String,
    pub app_name: Option<String>,
    pub app_icon: Option<String>,
}

impl PageContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            app_name: None,
            app_icon: None,
        }
    }

    #[must_use]
    pub fn with_app(mut self, name: impl Into<String>, icon: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self.app_icon = Some(icon.into());
        self
    }

    /// Overwrite identifying fields in `params` with observed values.
    fn stamp(&self, kind: RequestKind, params: &mut Params) {
        params.insert("domain".into(), Value::String(self.origin.clone()));
        params.remove("appName");
        params.remove("appIcon");
        if kind == RequestKind::Connect {
            if let Some(ref name) = self.app_name {
                params.insert("appName".into(), Value::String(name.clone()));
            }
            if let Some(ref icon) = self.app_icon {
                params.insert("appIcon".into(), Value::String(icon.clone()));
            }
        }
    }
}

#[derive(Default)]
struct Inflight {
    calls: HashMap<String, oneshot::Sender<OutboundResponse>>,
    closed: bool,
}

/// Page-side client of the relay.
pub struct PageBridge {
    context: PageContext,
    outbound: mpsc::Sender<PageEnvelope>,
    inflight: Arc<Mutex<Inflight>>,
    pump: JoinHandle<()>,
}

impl PageBridge {
    pub fn new(
        context: PageContext,
        outbound: mpsc::Sender<PageEnvelope>,
        inbound: mpsc::Receiver<ReplyEnvelope>,
    ) -> Self {
        let inflight = Arc::new(Mutex::new(Inflight::default()));
        let pump = tokio::spawn(pump_replies(inbound, Arc::clone(&inflight)));
        Self {
            context,
            outbound,
            inflight,
            pump,
        }
    }

    /// Send a request and wait for its single response.
    pub async fn send(
        &self,
        kind: RequestKind,
        mut params: Params,
    ) -> Result<OutboundResponse, BridgeError> {
        self.context.stamp(kind, &mut params);
        let id = uuid::Uuid::new_v4().to_string();

        let (tx, rx) = oneshot::channel();
        {
            let mut inflight = self.inflight.lock().await;
            if inflight.closed {
                return Err(BridgeError::LinkClosed);
            }
            inflight.calls.insert(id.clone(), tx);
        }

        let envelope = PageEnvelope {
            id: id.clone(),
            action: kind,
            params,
        };
        if self.outbound.send(envelope).await.is_err() {
            self.inflight.lock().await.calls.remove(&id);
            return Err(BridgeError::LinkClosed);
        }

        rx.await.map_err(|_| BridgeError::LinkClosed)
    }

    /// Number of calls still waiting for a reply.
    pub async fn inflight(&self) -> usize {
        self.inflight.lock().await.calls.len()
    }
}

impl Drop for PageBridge {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_replies(mut inbound: mpsc::Receiver<ReplyEnvelope>, inflight: Arc<Mutex<Inflight>>) {
    while let Some(ReplyEnvelope { id, response }) = inbound.recv().await {
        let call = inflight.lock().await.calls.remove(&id);
        match call {
            Some(call) => {
                if call.send(response).is_err() {
                    debug!(%id, "Caller stopped waiting for reply");
                }
            }
            None => {
                warn!(
                    %id,
                    kind = %response.kind,
                    "Dropping reply for unknown or already answered call"
                );
            }
        }
    }

    let mut inflight = inflight.lock().await;
    inflight.closed = true;
    let orphaned = inflight.calls.len();
    inflight.calls.clear();
    drop(inflight);
    if orphaned > 0 {
        warn!(orphaned, "Relay link closed with calls outstanding");
    }
}
