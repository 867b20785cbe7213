//! Relay event loop.
//!
//! One task owns the [`Router`] and processes page requests and surface
//! events strictly one at a time, so slot bookkeeping and store writes never
//! interleave.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use keyward_core::Config;
use keyward_core::config::PendingPolicy;
use keyward_core::protocol::OutboundResponse;
use keyward_core::RequestError;

use crate::correlator::{ReplySender, ResponseCorrelator};
use crate::price::{ExchangeRateCache, PriceSource};
use crate::router::{PageRequest, Router};
use crate::storage::StateStore;
use crate::surface::{SurfaceEvent, SurfaceLauncher, SurfaceManager, SurfaceSpec};

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Relay has stopped")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Work items for the relay loop.
#[derive(Debug)]
pub enum RelayEvent {
    Page {
        request: PageRequest,
        reply: ReplySender,
    },
}

/// Runtime settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub inactivity_limit: Duration,
    pub exchange_rate_ttl: Duration,
    pub pending_policy: PendingPolicy,
    pub surface: SurfaceSpec,
    pub queue_capacity: usize,
}

impl RelaySettings {
    pub fn from_config(config: &Config, db_path: Option<PathBuf>) -> Self {
        Self {
            inactivity_limit: config.session.inactivity_limit(),
            exchange_rate_ttl: Duration::from_secs(config.exchange_rate.cache_ttl_secs),
            pending_policy: config.pending.policy,
            surface: SurfaceSpec::from_config(&config.surface, db_path),
            queue_capacity: config.relay.queue_capacity.max(1),
        }
    }
}

/// Assembles and spawns the relay.
pub struct RelayBuilder {
    store: StateStore,
    launcher: Arc<dyn SurfaceLauncher>,
    prices: Arc<dyn PriceSource>,
    settings: RelaySettings,
}

impl RelayBuilder {
    pub fn new(
        store: StateStore,
        launcher: Arc<dyn SurfaceLauncher>,
        prices: Arc<dyn PriceSource>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            store,
            launcher,
            prices,
            settings,
        }
    }

    /// Spawn the relay loop. It runs until every [`RelayHandle`] is dropped.
    pub fn spawn(self) -> (RelayHandle, JoinHandle<()>) {
        let Self {
            store,
            launcher,
            prices,
            settings,
        } = self;

        let (page_tx, page_rx) = mpsc::channel(settings.queue_capacity);
        let (surface_tx, surface_rx) = mpsc::channel(settings.queue_capacity);

        let surfaces = SurfaceManager::new(launcher, settings.surface, surface_tx, store.clone());
        let router = Router::new(
            store,
            ResponseCorrelator::new(settings.pending_policy),
            surfaces,
            ExchangeRateCache::new(prices, settings.exchange_rate_ttl),
            settings.inactivity_limit,
        );

        info!(
            policy = ?settings.pending_policy,
            inactivity_limit_secs = settings.inactivity_limit.as_secs(),
            "Relay started"
        );
        let task = tokio::spawn(run(router, page_rx, surface_rx));
        (RelayHandle { events: page_tx }, task)
    }
}

async fn run(
    router: Router,
    mut pages: mpsc::Receiver<RelayEvent>,
    mut surfaces: mpsc::Receiver<SurfaceEvent>,
) {
    loop {
        tokio::select! {
            biased;
            // Surface events first: a decision already on the wire is
            // applied before a newer page request can supersede its slot.
            Some(event) = surfaces.recv() => {
                router.handle_surface_event(event).await;
            }
            event = pages.recv() => {
                match event {
                    Some(RelayEvent::Page { request, reply }) => {
                        debug!(
                            kind = %request.kind,
                            request_id = %request.request_id,
                            "Routing page request"
                        );
                        router.route(request, reply).await;
                    }
                    None => break,
                }
            }
        }
    }

    info!("Page link closed, stopping relay");
    router.shutdown().await;
}

/// Cheap handle for submitting page requests to the relay.
#[derive(Clone)]
pub struct RelayHandle {
    events: mpsc::Sender<RelayEvent>,
}

impl RelayHandle {
    /// Queue a request; `reply` receives its single response.
    pub async fn submit(&self, request: PageRequest, reply: ReplySender) -> Result<(), RelayError> {
        self.events
            .send(RelayEvent::Page { request, reply })
            .await
            .map_err(|_| RelayError::Stopped)
    }

    /// Submit a request and wait for its response.
    pub async fn request(&self, request: PageRequest) -> OutboundResponse {
        let kind = request.kind;
        let (tx, rx) = oneshot::channel();
        if self.submit(request, tx).await.is_err() {
            return OutboundResponse::failure(kind, &RequestError::Dropped);
        }
        rx.await
            .unwrap_or_else(|_| OutboundResponse::failure(kind, &RequestError::Dropped))
    }
}
