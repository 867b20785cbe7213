//! Storage layer tests for the relay state store.

use std::time::Duration;

use keyward_core::clock::unix_timestamp_millis;
use keyward_core::protocol::{Params, RequestKind, StateKey};
use keyward_core::Origin;

use super::db::StateStore;
use super::models::NewPending;

async fn test_store() -> StateStore {
    StateStore::open_in_memory().await.unwrap()
}

fn params(json: serde_json::Value) -> Params {
    match json {
        serde_json::Value::Object(map) => map,
        _ => Params::new(),
    }
}

// === Whitelist tests ===

#[tokio::test]
async fn whitelist_upsert_is_unique_per_domain() {
    let store = test_store().await;
    store.upsert_whitelist("app.com", "old.png").await.unwrap();
    store.upsert_whitelist("app.com", "new.png").await.unwrap();

    let entries = store.list_whitelist().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].icon, "new.png");
}

#[tokio::test]
async fn whitelist_remove() {
    let store = test_store().await;
    store.upsert_whitelist("app.com", "").await.unwrap();

    assert!(store.remove_whitelist("app.com").await.unwrap());
    assert!(!store.remove_whitelist("app.com").await.unwrap());
    assert!(store.whitelist_entry("app.com").await.unwrap().is_none());
}

// === Lock state tests ===

#[tokio::test]
async fn fresh_store_is_locked() {
    let store = test_store().await;
    let lock = store.lock_state().await.unwrap();
    assert!(lock.is_locked);
}

#[tokio::test]
async fn unlock_records_activity() {
    let store = test_store().await;
    store.set_locked(false).await.unwrap();

    let snapshot = store
        .auth_snapshot(Duration::from_secs(600))
        .await
        .unwrap();
    assert!(snapshot.is_session_live(unix_timestamp_millis()));
}

#[tokio::test]
async fn stale_activity_is_not_live() {
    let store = test_store().await;
    store.set_locked(false).await.unwrap();
    let now = unix_timestamp_millis();
    store.set_last_active_time(now - 11 * 60_000).await.unwrap();

    let snapshot = store
        .auth_snapshot(Duration::from_secs(600))
        .await
        .unwrap();
    assert!(!snapshot.lock.is_locked);
    assert!(!snapshot.is_session_live(now));
    assert!(!snapshot.is_whitelisted(&Origin::parse("app.com").unwrap()));
}

// === Pending tests ===

#[tokio::test]
async fn pending_is_one_per_kind() {
    let store = test_store().await;
    let p1 = params(serde_json::json!({"message": "first"}));
    let p2 = params(serde_json::json!({"message": "second"}));

    for (id, p) in [("r-1", &p1), ("r-2", &p2)] {
        store
            .put_pending(&NewPending {
                kind: RequestKind::SignMessage,
                request_id: id,
                origin: "app.com",
                params: p,
                created_at: 1,
            })
            .await
            .unwrap();
    }

    let record = store.pending(RequestKind::SignMessage).await.unwrap().unwrap();
    assert_eq!(record.request_id, "r-2");
    assert_eq!(record.params_map().unwrap()["message"], "second");
    assert_eq!(store.list_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn take_pending_requires_matching_request_id() {
    let store = test_store().await;
    let p = Params::new();
    store
        .put_pending(&NewPending {
            kind: RequestKind::Encrypt,
            request_id: "r-1",
            origin: "app.com",
            params: &p,
            created_at: 1,
        })
        .await
        .unwrap();

    assert!(store
        .take_pending(RequestKind::Encrypt, "r-other")
        .await
        .unwrap()
        .is_none());
    let taken = store
        .take_pending(RequestKind::Encrypt, "r-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(taken.request_kind().unwrap(), RequestKind::Encrypt);
    assert!(store.pending(RequestKind::Encrypt).await.unwrap().is_none());
}

// === Surface handle tests ===

#[tokio::test]
async fn surface_handle_lifecycle() {
    let store = test_store().await;
    assert!(store.surface_handle().await.unwrap().is_none());

    store.set_surface_handle("s-1").await.unwrap();
    assert_eq!(
        store.surface_handle().await.unwrap().unwrap().surface_id,
        "s-1"
    );

    assert!(store.clear_surface_handle().await.unwrap());
    assert!(!store.clear_surface_handle().await.unwrap());
}

#[tokio::test]
async fn recovery_discards_stale_state() {
    let store = test_store().await;
    let p = Params::new();
    store
        .put_pending(&NewPending {
            kind: RequestKind::SendBsv,
            request_id: "r-1",
            origin: "app.com",
            params: &p,
            created_at: 1,
        })
        .await
        .unwrap();
    store.set_surface_handle("s-1").await.unwrap();

    let report = store.recover_stale_state().await.unwrap();
    assert_eq!(report.pending_discarded, 1);
    assert!(report.surface_discarded);
    assert!(store.list_pending().await.unwrap().is_empty());
}

// === Exchange rate and wallet state tests ===

#[tokio::test]
async fn exchange_rate_cache_overwrites() {
    let store = test_store().await;
    store.put_exchange_rate(40.5, 1_000).await.unwrap();
    store.put_exchange_rate(41.0, 2_000).await.unwrap();

    let cached = store.cached_exchange_rate().await.unwrap().unwrap();
    assert!((cached.rate - 41.0).abs() < f64::EPSILON);
    assert_eq!(cached.fetched_at, 2_000);
}

#[tokio::test]
async fn wallet_state_roundtrip() {
    let store = test_store().await;
    assert!(store.wallet_state(StateKey::AppState).await.unwrap().is_none());

    let state = serde_json::json!({"balance": {"satoshis": 5000}});
    store
        .put_wallet_state(StateKey::AppState, &state)
        .await
        .unwrap();
    assert_eq!(
        store.wallet_state(StateKey::AppState).await.unwrap(),
        Some(state)
    );
}
