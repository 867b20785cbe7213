//! Request router.
//!
//! Every page request passes through [`Router::route`], which answers it
//! exactly once: immediately for no-auth and immediate kinds, or later
//! through the correlator once the approver surface decides. Surface events
//! come in through [`Router::handle_surface_event`].

mod handlers;
mod validate;

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use keyward_core::authorization::{self, Authorization, ConnectDisposition};
use keyward_core::clock::unix_timestamp_millis;
use keyward_core::protocol::{
    Decision, KindClass, OutboundResponse, PageEnvelope, Params, RequestKind, SessionEvent,
    SurfaceMessage, SurfaceReply,
};
use keyward_core::{Origin, RequestError};

use crate::correlator::{
    Delivery, RegisterError, Registration, ReplySender, ResponseCorrelator, SlotInfo, SlotState,
    send_reply,
};
use crate::price::ExchangeRateCache;
use crate::storage::{NewPending, StateStore};
use crate::surface::{SurfaceEvent, SurfaceManager};

pub use validate::validate;

/// A page request as seen by the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Relay-assigned id of the pending slot this request may occupy.
    pub request_id: String,
    pub kind: RequestKind,
    /// Origin as claimed by the bridge. Untrusted until parsed.
    pub origin: String,
    pub params: Params,
}

impl PageRequest {
    pub fn new(kind: RequestKind, params: Params) -> Self {
        let origin = params
            .get("domain")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            kind,
            origin,
            params,
        }
    }

    pub fn from_envelope(envelope: PageEnvelope) -> Self {
        Self::new(envelope.action, envelope.params)
    }
}

/// Dispatches page requests and surface events.
pub struct Router {
    store: StateStore,
    correlator: ResponseCorrelator,
    surfaces: SurfaceManager,
    rates: ExchangeRateCache,
    inactivity_limit: Duration,
}

impl Router {
    pub const fn new(
        store: StateStore,
        correlator: ResponseCorrelator,
        surfaces: SurfaceManager,
        rates: ExchangeRateCache,
        inactivity_limit: Duration,
    ) -> Self {
        Self {
            store,
            correlator,
            surfaces,
            rates,
            inactivity_limit,
        }
    }

    pub const fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    pub const fn surfaces(&self) -> &SurfaceManager {
        &self.surfaces
    }

    /// Route a page request. `reply` is answered exactly once, now or later.
    pub async fn route(&self, request: PageRequest, reply: ReplySender) {
        let kind = request.kind;

        let origin = match Origin::parse(&request.origin) {
            Ok(origin) => origin,
            Err(e) => {
                info!(%kind, error = %e, "Rejecting request with invalid origin");
                send_reply(reply, OutboundResponse::failure(kind, &RequestError::Unauthorized));
                return;
            }
        };

        let now_ms = unix_timestamp_millis();
        let snapshot = match self.store.auth_snapshot(self.inactivity_limit).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%kind, error = %e, "Failed to load authorization state");
                send_reply(
                    reply,
                    OutboundResponse::failure(kind, &RequestError::Handler(e.to_string())),
                );
                return;
            }
        };

        match kind.class() {
            KindClass::NoAuth => {
                let connected = authorization::is_connected(&origin, &snapshot, now_ms);
                debug!(%kind, origin = %origin, connected, "Answered no-auth query");
                send_reply(reply, OutboundResponse::success(kind, json!(connected)));
            }
            KindClass::Immediate => {
                if let Authorization::Denied { reason } =
                    authorization::authorize(kind, &origin, &snapshot, now_ms)
                {
                    info!(%kind, origin = %origin, ?reason, "Request denied");
                    send_reply(reply, OutboundResponse::failure(kind, &RequestError::Unauthorized));
                    return;
                }
                if let Err(e) = validate(kind, &request.params) {
                    send_reply(reply, OutboundResponse::failure(kind, &e));
                    return;
                }
                let response = match self.immediate(kind, &origin, &request.params, now_ms).await {
                    Ok(data) => OutboundResponse::success(kind, data),
                    Err(e) => {
                        warn!(%kind, origin = %origin, error = %e, "Immediate handler failed");
                        OutboundResponse::failure(kind, &e)
                    }
                };
                send_reply(reply, response);
            }
            KindClass::Interactive if kind == RequestKind::Connect => {
                match authorization::connect_disposition(&origin, &snapshot, now_ms) {
                    ConnectDisposition::AutoApprove => {
                        if let Some(identity) = self.identity_pub_key().await {
                            info!(origin = %origin, "Reconnect auto-approved");
                            send_reply(reply, OutboundResponse::success(kind, json!(identity)));
                            return;
                        }
                        debug!(origin = %origin, "No identity key published, asking the user");
                        self.await_decision(request, origin, true, reply).await;
                    }
                    ConnectDisposition::NeedsApproval { authorized } => {
                        self.await_decision(request, origin, authorized, reply).await;
                    }
                }
            }
            KindClass::Interactive => {
                if let Authorization::Denied { reason } =
                    authorization::authorize(kind, &origin, &snapshot, now_ms)
                {
                    info!(%kind, origin = %origin, ?reason, "Request denied");
                    send_reply(reply, OutboundResponse::failure(kind, &RequestError::Unauthorized));
                    return;
                }
                if let Err(e) = validate(kind, &request.params) {
                    info!(%kind, origin = %origin, "Request failed validation");
                    send_reply(reply, OutboundResponse::failure(kind, &e));
                    return;
                }
                self.await_decision(request, origin, true, reply).await;
            }
        }
    }

    /// Park an interactive request in its slot and make sure a surface is open.
    async fn await_decision(
        &self,
        request: PageRequest,
        origin: Origin,
        authorized: bool,
        reply: ReplySender,
    ) {
        let PageRequest {
            request_id,
            kind,
            mut params,
            ..
        } = request;
        if kind == RequestKind::Connect {
            params.insert("isAuthorized".into(), Value::Bool(authorized));
        }

        match self
            .correlator
            .register(kind, &request_id, origin.clone(), reply)
            .await
        {
            Ok(Registration::Fresh) => {}
            Ok(Registration::Superseded {
                previous_request_id,
            }) => {
                info!(%kind, %request_id, %previous_request_id, "Superseded pending request");
            }
            Err(RegisterError::AlreadyPending { reply, .. }) => {
                send_reply(
                    reply,
                    OutboundResponse::failure(kind, &RequestError::AlreadyPending),
                );
                return;
            }
        }

        let pending = NewPending {
            kind,
            request_id: &request_id,
            origin: origin.as_str(),
            params: &params,
            created_at: unix_timestamp_millis(),
        };
        if let Err(e) = self.store.put_pending(&pending).await {
            warn!(%kind, %request_id, error = %e, "Failed to persist pending request");
            self.correlator
                .deliver(
                    kind,
                    Some(&request_id),
                    OutboundResponse::failure(kind, &RequestError::Handler(e.to_string())),
                )
                .await;
            self.close_if_idle().await;
            return;
        }

        match self.surfaces.open_if_absent().await {
            Ok(surface_id) => {
                info!(%kind, %request_id, origin = %origin, %surface_id, "Awaiting user decision");
            }
            Err(e) => {
                warn!(%kind, %request_id, error = %e, "Failed to open approver surface");
                let error = RequestError::SurfaceUnavailable(e.to_string());
                let failed = self.correlator.finish_all(SlotState::Failed, &error).await;
                self.clear_pending_records().await;
                debug!(failed = failed.len(), "Failed all awaiting requests");
            }
        }
    }

    /// React to something the approver surface did.
    pub async fn handle_surface_event(&self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Message {
                surface_id,
                message,
            } => match message {
                SurfaceMessage::Reply(reply) => {
                    if !self.surfaces.is_current(&surface_id).await {
                        warn!(
                            %surface_id,
                            kind = %reply.kind,
                            "Ignoring reply from a closed surface"
                        );
                        return;
                    }
                    self.on_reply(reply).await;
                }
                SurfaceMessage::Session(event) => self.on_session(event).await,
                SurfaceMessage::StateUpdate { key, value } => {
                    if let Err(e) = self.store.put_wallet_state(key, &value).await {
                        warn!(key = key.as_str(), error = %e, "Failed to store wallet state");
                    } else {
                        debug!(key = key.as_str(), "Wallet state updated");
                    }
                }
                SurfaceMessage::Unknown { action, .. } => {
                    warn!(%surface_id, %action, "Ignoring unknown surface action");
                }
            },
            SurfaceEvent::Closed { surface_id } => {
                if !self.surfaces.on_closed(&surface_id).await {
                    return;
                }
                let dismissed = self
                    .correlator
                    .finish_all(SlotState::Dismissed, &RequestError::Dismissed)
                    .await;
                self.clear_pending_records().await;
                info!(%surface_id, dismissed = dismissed.len(), "Dismissed pending requests");
            }
        }
    }

    async fn on_reply(&self, reply: SurfaceReply) {
        let kind = reply.kind;
        let Some(slot) = self.correlator.peek(kind).await else {
            warn!(%kind, "Missing response channel: no pending request for reply");
            return;
        };
        if let Some(id) = reply.request_id.as_deref()
            && id != slot.request_id
        {
            warn!(
                %kind,
                request_id = id,
                pending_request_id = %slot.request_id,
                "Ignoring stale reply for a request that is no longer pending"
            );
            return;
        }

        let response = self.decision_response(&slot, reply).await;
        match self
            .correlator
            .deliver(kind, Some(&slot.request_id), response)
            .await
        {
            Delivery::Delivered { request_id } => {
                if let Err(e) = self.store.take_pending(kind, &request_id).await {
                    warn!(%kind, %request_id, error = %e, "Failed to clear pending record");
                }
            }
            other => warn!(%kind, ?other, "Reply was not delivered"),
        }

        self.close_if_idle().await;
    }

    /// Turn a surface reply into the caller's response.
    async fn decision_response(&self, slot: &SlotInfo, reply: SurfaceReply) -> OutboundResponse {
        let kind = slot.kind;
        if let Some(error) = reply.error() {
            return OutboundResponse::failure(kind, &RequestError::Handler(error.to_string()));
        }
        if kind != RequestKind::Connect {
            return OutboundResponse::success(kind, reply.into_data());
        }

        match reply.decision() {
            Some(Decision::Approved) => match self.approve_connect(slot, &reply).await {
                Ok(identity) => OutboundResponse::success(kind, json!(identity)),
                Err(e) => OutboundResponse::failure(kind, &e),
            },
            Some(Decision::Declined) => {
                info!(origin = %slot.origin, "Connect declined");
                OutboundResponse::failure(kind, &RequestError::Declined)
            }
            None => OutboundResponse::failure(
                kind,
                &RequestError::Handler("Connect reply carried no decision".into()),
            ),
        }
    }

    async fn approve_connect(
        &self,
        slot: &SlotInfo,
        reply: &SurfaceReply,
    ) -> Result<String, RequestError> {
        let icon = match self.store.pending(RequestKind::Connect).await {
            Ok(Some(record)) => record
                .params_map()
                .ok()
                .and_then(|p| p.get("appIcon").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_default(),
            Ok(None) => String::new(),
            Err(e) => return Err(handlers::fault(e)),
        };
        self.store
            .upsert_whitelist(slot.origin.as_str(), &icon)
            .await
            .map_err(handlers::fault)?;
        info!(origin = %slot.origin, "Site whitelisted");

        let identity = match reply.payload.get("pubKeys").and_then(handlers::identity_from) {
            Some(identity) => Some(identity),
            None => self.identity_pub_key().await,
        };
        identity.ok_or_else(|| RequestError::Handler("No identity key available".into()))
    }

    async fn on_session(&self, event: SessionEvent) {
        let result = match event {
            SessionEvent::Lock => self.store.set_locked(true).await,
            SessionEvent::Unlock => self.store.set_locked(false).await,
            SessionEvent::Activity => self.store.record_activity().await,
        };
        match result {
            Ok(()) => debug!(?event, "Session state updated"),
            Err(e) => warn!(?event, error = %e, "Failed to update session state"),
        }
    }

    /// Close the surface once nothing is waiting on it.
    async fn close_if_idle(&self) {
        if self.correlator.awaiting_count().await == 0 {
            self.surfaces.close_current().await;
        }
    }

    async fn clear_pending_records(&self) {
        if let Err(e) = self.store.clear_pending().await {
            warn!(error = %e, "Failed to clear pending records");
        }
    }

    /// Answer everything still waiting and close the surface.
    pub async fn shutdown(&self) {
        self.surfaces.close_current().await;
        let dropped = self
            .correlator
            .finish_all(SlotState::Failed, &RequestError::Dropped)
            .await;
        self.clear_pending_records().await;
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "Failed pending requests on shutdown");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests;
