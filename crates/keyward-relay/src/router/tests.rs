//! Router tests driven by an in-process surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use keyward_core::config::PendingPolicy;
use keyward_core::clock::unix_timestamp_millis;
use keyward_core::protocol::{
    OutboundResponse, Params, RequestKind, StateKey, SurfaceMessage, SurfaceReply,
};
use keyward_core::RequestError;

use super::{PageRequest, Router};
use crate::correlator::ResponseCorrelator;
use crate::price::{ExchangeRateCache, PriceError, PriceSource};
use crate::storage::StateStore;
use crate::surface::{InProcessLauncher, SurfaceEvent, SurfaceManager, SurfaceSession, SurfaceSpec};

struct FixedRate(f64);

#[async_trait]
impl PriceSource for FixedRate {
    async fn fetch_rate(&self) -> Result<f64, PriceError> {
        Ok(self.0)
    }
}

struct Harness {
    router: Router,
    store: StateStore,
    sessions: mpsc::UnboundedReceiver<SurfaceSession>,
    events: mpsc::Receiver<SurfaceEvent>,
}

impl Harness {
    async fn new() -> Self {
        let store = StateStore::open_in_memory().await.unwrap();
        let (launcher, sessions) = InProcessLauncher::new();
        let (events_tx, events) = mpsc::channel(16);
        let spec = SurfaceSpec {
            width: 392,
            height: 567,
            entry_view: "index.html".into(),
            db_path: None,
        };
        let surfaces = SurfaceManager::new(Arc::new(launcher), spec, events_tx, store.clone());
        let rates = ExchangeRateCache::new(Arc::new(FixedRate(48.25)), Duration::from_secs(300));
        let router = Router::new(
            store.clone(),
            ResponseCorrelator::new(PendingPolicy::Supersede),
            surfaces,
            rates,
            Duration::from_secs(600),
        );
        Self {
            router,
            store,
            sessions,
            events,
        }
    }

    /// Whitelist `domain` and start a live session.
    async fn connect_site(&self, domain: &str) {
        self.store.upsert_whitelist(domain, "icon.png").await.unwrap();
        self.store.set_locked(false).await.unwrap();
    }

    async fn send(&self, kind: RequestKind, params: Value) -> oneshot::Receiver<OutboundResponse> {
        let (tx, rx) = oneshot::channel();
        self.router.route(PageRequest::new(kind, to_params(params)), tx).await;
        rx
    }

    /// Forward the next surface event to the router.
    async fn pump(&mut self) {
        let event = self.events.recv().await.unwrap();
        self.router.handle_surface_event(event).await;
    }
}

fn to_params(v: Value) -> Params {
    match v {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

#[tokio::test]
async fn unauthorized_immediate_request_opens_no_surface() {
    let mut h = Harness::new().await;

    let rx = h.send(RequestKind::GetBalance, json!({"domain": "evil.com"})).await;
    let resp = rx.await.unwrap();

    assert!(resp.is_failure(&RequestError::Unauthorized));
    assert!(h.sessions.try_recv().is_err());
}

#[tokio::test]
async fn invalid_origin_is_unauthorized() {
    let h = Harness::new().await;
    let resp = h
        .send(RequestKind::IsConnected, json!({"domain": "not a host!"}))
        .await
        .await
        .unwrap();
    assert!(resp.is_failure(&RequestError::Unauthorized));
}

#[tokio::test]
async fn immediate_request_reads_published_state() {
    let h = Harness::new().await;
    h.connect_site("app.com").await;
    h.store
        .put_wallet_state(
            StateKey::AppState,
            &json!({"balance": {"satoshis": 1500}, "pubKeys": {"identityPubKey": "02id"}}),
        )
        .await
        .unwrap();

    let resp = h
        .send(RequestKind::GetBalance, json!({"domain": "app.com"}))
        .await
        .await
        .unwrap();
    assert_eq!(resp, OutboundResponse::success(RequestKind::GetBalance, json!({"satoshis": 1500})));

    let resp = h
        .send(RequestKind::GetOrdinals, json!({"domain": "app.com"}))
        .await
        .await
        .unwrap();
    assert!(resp.is_failure(&RequestError::Handler("No ordinals available".into())));
}

#[tokio::test]
async fn exchange_rate_comes_from_price_source() {
    let h = Harness::new().await;
    h.connect_site("app.com").await;
    let resp = h
        .send(RequestKind::GetExchangeRate, json!({"domain": "app.com"}))
        .await
        .await
        .unwrap();
    assert_eq!(resp.data, Some(json!(48.25)));
}

#[tokio::test]
async fn tagged_keys_are_filtered_by_label_and_ids() {
    let h = Harness::new().await;
    h.connect_site("app.com").await;
    h.store
        .put_wallet_state(
            StateKey::DerivationTags,
            &json!([
                {"label": "chat", "id": "a", "pubKey": "02a"},
                {"label": "chat", "id": "b", "pubKey": "02b"},
                {"label": "game", "id": "a", "pubKey": "02c"},
            ]),
        )
        .await
        .unwrap();

    let resp = h
        .send(RequestKind::GetTaggedKeys, json!({"domain": "app.com", "label": "chat", "ids": ["b"]}))
        .await
        .await
        .unwrap();
    assert_eq!(resp.data, Some(json!([{"label": "chat", "id": "b", "pubKey": "02b"}])));

    let resp = h
        .send(RequestKind::GetTaggedKeys, json!({"domain": "app.com"}))
        .await
        .await
        .unwrap();
    assert!(resp.is_failure(&RequestError::Validation));
}

#[tokio::test]
async fn disconnect_removes_whitelist_entry() {
    let h = Harness::new().await;
    h.connect_site("app.com").await;

    let resp = h
        .send(RequestKind::Disconnect, json!({"domain": "app.com"}))
        .await
        .await
        .unwrap();
    assert!(resp.success);
    assert!(h.store.whitelist_entry("app.com").await.unwrap().is_none());
}

#[tokio::test]
async fn validation_failure_short_circuits() {
    let mut h = Harness::new().await;
    h.connect_site("app.com").await;

    let resp = h
        .send(RequestKind::SignMessage, json!({"domain": "app.com"}))
        .await
        .await
        .unwrap();

    assert!(resp.is_failure(&RequestError::Validation));
    assert!(h.sessions.try_recv().is_err());
    assert_eq!(h.router.correlator().awaiting_count().await, 0);
    assert!(h.store.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn reply_resolves_slot_and_closes_surface() {
    let mut h = Harness::new().await;
    h.connect_site("app.com").await;

    let rx = h
        .send(RequestKind::SignMessage, json!({"domain": "app.com", "message": "hello"}))
        .await;
    let session = h.sessions.recv().await.unwrap();
    let record = h.store.pending(RequestKind::SignMessage).await.unwrap().unwrap();
    assert_eq!(record.origin, "app.com");

    session
        .reply(
            SurfaceReply::new(RequestKind::SignMessage, json!({"sig": "3045", "pubKey": "02ab"}))
                .with_request_id(record.request_id.clone()),
        )
        .await;
    h.pump().await;

    let resp = rx.await.unwrap();
    assert_eq!(resp.data, Some(json!({"sig": "3045", "pubKey": "02ab"})));
    assert!(h.store.pending(RequestKind::SignMessage).await.unwrap().is_none());
    assert!(h.router.surfaces().current().await.is_none());

    // The relay's own close is not a dismissal.
    h.pump().await;
    assert_eq!(h.router.correlator().awaiting_count().await, 0);
}

#[tokio::test]
async fn surface_error_fails_the_request() {
    let mut h = Harness::new().await;
    h.connect_site("app.com").await;

    let rx = h
        .send(RequestKind::Broadcast, json!({"domain": "app.com", "rawtx": "0100"}))
        .await;
    let session = h.sessions.recv().await.unwrap();
    session
        .reply(SurfaceReply::new(RequestKind::Broadcast, json!({"error": "Broadcast failed"})))
        .await;
    h.pump().await;

    assert!(rx.await.unwrap().is_failure(&RequestError::Handler("Broadcast failed".into())));
}

#[tokio::test]
async fn approved_connect_whitelists_site() {
    let mut h = Harness::new().await;

    let rx = h
        .send(
            RequestKind::Connect,
            json!({"domain": "new.app", "appName": "New", "appIcon": "https://new.app/i.png"}),
        )
        .await;
    let session = h.sessions.recv().await.unwrap();
    let record = h.store.pending(RequestKind::Connect).await.unwrap().unwrap();
    assert_eq!(record.params_map().unwrap()["isAuthorized"], json!(false));

    session
        .reply(SurfaceReply::new(
            RequestKind::Connect,
            json!({"decision": "approved", "pubKeys": {"identityPubKey": "02id"}}),
        ))
        .await;
    h.pump().await;

    assert_eq!(rx.await.unwrap().data, Some(json!("02id")));
    let entry = h.store.whitelist_entry("new.app").await.unwrap().unwrap();
    assert_eq!(entry.icon, "https://new.app/i.png");
}

#[tokio::test]
async fn declined_connect_leaves_whitelist_alone() {
    let mut h = Harness::new().await;

    let rx = h.send(RequestKind::Connect, json!({"domain": "new.app"})).await;
    let session = h.sessions.recv().await.unwrap();
    session
        .reply(SurfaceReply::new(RequestKind::Connect, json!({"decision": "declined"})))
        .await;
    h.pump().await;

    assert!(rx.await.unwrap().is_failure(&RequestError::Declined));
    assert!(h.store.list_whitelist().await.unwrap().is_empty());
}

#[tokio::test]
async fn launch_failure_fails_awaiting_requests() {
    let mut h = Harness::new().await;
    h.connect_site("app.com").await;
    h.sessions.close();

    let rx = h
        .send(RequestKind::SignMessage, json!({"domain": "app.com", "message": "hi"}))
        .await;
    let resp = rx.await.unwrap();

    assert_eq!(
        resp.error.as_deref(),
        Some("Failed to open approval window: no surface host is listening")
    );
    assert!(h.store.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn session_events_update_lock_state() {
    let mut h = Harness::new().await;
    h.connect_site("app.com").await;

    let _rx = h
        .send(
            RequestKind::Encrypt,
            json!({"domain": "app.com", "message": "m", "pubKeys": ["02a"]}),
        )
        .await;
    let session = h.sessions.recv().await.unwrap();

    session.send(SurfaceMessage::Session(keyward_core::protocol::SessionEvent::Lock)).await;
    h.pump().await;
    assert!(h.store.lock_state().await.unwrap().is_locked);

    let before = unix_timestamp_millis();
    session.send(SurfaceMessage::Session(keyward_core::protocol::SessionEvent::Unlock)).await;
    h.pump().await;
    let lock = h.store.lock_state().await.unwrap();
    assert!(!lock.is_locked);
    assert!(lock.last_active_time >= before);
}

#[tokio::test]
async fn shutdown_answers_everything() {
    let mut h = Harness::new().await;
    h.connect_site("app.com").await;

    let rx = h
        .send(RequestKind::Decrypt, json!({"domain": "app.com", "messages": ["x"]}))
        .await;
    let _session = h.sessions.recv().await.unwrap();

    h.router.shutdown().await;
    assert!(rx.await.unwrap().is_failure(&RequestError::Dropped));
    assert!(h.router.surfaces().current().await.is_none());
}
