//! In-memory slot table keyed by request kind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use keyward_core::config::PendingPolicy;
use keyward_core::protocol::{OutboundResponse, RequestKind};
use keyward_core::{Origin, RequestError};

use super::types::{
    Delivery, PendingSlot, RegisterError, Registration, ReplySender, SlotInfo, SlotState,
};

/// Correlates surface decisions back to the page callers waiting on them.
#[derive(Clone)]
pub struct ResponseCorrelator {
    slots: Arc<RwLock<HashMap<RequestKind, PendingSlot>>>,
    policy: PendingPolicy,
}

impl ResponseCorrelator {
    pub fn new(policy: PendingPolicy) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    /// Register the reply channel for a new interactive request.
    pub async fn register(
        &self,
        kind: RequestKind,
        request_id: &str,
        origin: Origin,
        reply: ReplySender,
    ) -> Result<Registration, RegisterError> {
        let mut slots = self.slots.write().await;

        if let Some(existing) = slots.get(&kind) {
            if self.policy == PendingPolicy::Reject {
                let pending_request_id = existing.info.request_id.clone();
                drop(slots);
                info!(
                    %kind,
                    request_id,
                    pending_request_id = %pending_request_id,
                    "Rejecting request: kind already awaiting approval"
                );
                return Err(RegisterError::AlreadyPending {
                    pending_request_id,
                    reply,
                });
            }
        }

        let slot = PendingSlot {
            info: SlotInfo {
                kind,
                request_id: request_id.to_string(),
                origin,
            },
            created_at: Instant::now(),
            reply,
        };

        let registration = match slots.insert(kind, slot) {
            Some(previous) => {
                let previous_request_id = previous.info.request_id.clone();
                finish(
                    previous,
                    SlotState::Superseded,
                    OutboundResponse::failure(kind, &RequestError::Superseded),
                );
                Registration::Superseded {
                    previous_request_id,
                }
            }
            None => Registration::Fresh,
        };
        drop(slots);

        debug!(%kind, request_id, "Slot awaiting decision");
        Ok(registration)
    }

    /// Resolve the slot for `kind` exactly once.
    ///
    /// When `request_id` is given it must match the registered slot.
    pub async fn deliver(
        &self,
        kind: RequestKind,
        request_id: Option<&str>,
        response: OutboundResponse,
    ) -> Delivery {
        let mut slots = self.slots.write().await;

        let Some(slot) = slots.get(&kind) else {
            drop(slots);
            warn!(%kind, "Missing response channel: no pending request for reply");
            return Delivery::MissingChannel;
        };

        if let Some(id) = request_id
            && id != slot.info.request_id
        {
            let pending_request_id = slot.info.request_id.clone();
            drop(slots);
            warn!(
                %kind,
                request_id = id,
                pending_request_id = %pending_request_id,
                "Ignoring stale reply for a request that is no longer pending"
            );
            return Delivery::Stale { pending_request_id };
        }

        let Some(slot) = slots.remove(&kind) else {
            return Delivery::MissingChannel;
        };
        drop(slots);

        let request_id = slot.info.request_id.clone();
        finish(slot, SlotState::Resolved, response);
        Delivery::Delivered { request_id }
    }

    /// Terminate every awaiting slot at once with `error`.
    ///
    /// Returns the kinds and request ids that were terminated.
    pub async fn finish_all(
        &self,
        state: SlotState,
        error: &RequestError,
    ) -> Vec<(RequestKind, String)> {
        let drained: Vec<PendingSlot> = {
            let mut slots = self.slots.write().await;
            slots.drain().map(|(_, slot)| slot).collect()
        };

        drained
            .into_iter()
            .map(|slot| {
                let kind = slot.info.kind;
                let request_id = slot.info.request_id.clone();
                finish(slot, state, OutboundResponse::failure(kind, error));
                (kind, request_id)
            })
            .collect()
    }

    /// Identifying data of the slot for `kind`, if occupied.
    pub async fn peek(&self, kind: RequestKind) -> Option<SlotInfo> {
        self.slots
            .read()
            .await
            .get(&kind)
            .map(|slot| slot.info.clone())
    }

    pub async fn is_awaiting(&self, kind: RequestKind) -> bool {
        self.slots.read().await.contains_key(&kind)
    }

    /// Number of slots awaiting a decision.
    pub async fn awaiting_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

fn finish(slot: PendingSlot, state: SlotState, response: OutboundResponse) {
    let PendingSlot {
        info,
        created_at,
        reply,
    } = slot;
    let waited_ms = created_at.elapsed().as_millis();

    if send_reply(reply, response) {
        info!(
            kind = %info.kind,
            request_id = %info.request_id,
            origin = %info.origin,
            state = state.as_str(),
            waited_ms,
            "Pending request finished"
        );
    } else {
        debug!(
            kind = %info.kind,
            request_id = %info.request_id,
            state = state.as_str(),
            "Caller went away before the response was delivered"
        );
    }
}

/// Send a response, returning whether the caller was still listening.
pub(crate) fn send_reply(reply: ReplySender, response: OutboundResponse) -> bool {
    reply.send(response).is_ok()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn origin() -> Origin {
        Origin::parse("app.example.com").unwrap()
    }

    #[tokio::test]
    async fn deliver_resolves_and_clears_slot() {
        let correlator = ResponseCorrelator::new(PendingPolicy::Supersede);
        let (tx, rx) = oneshot::channel();

        let reg = correlator
            .register(RequestKind::SignMessage, "r-1", origin(), tx)
            .await
            .unwrap();
        assert_eq!(reg, Registration::Fresh);
        assert!(correlator.is_awaiting(RequestKind::SignMessage).await);

        let delivery = correlator
            .deliver(
                RequestKind::SignMessage,
                Some("r-1"),
                OutboundResponse::success(
                    RequestKind::SignMessage,
                    serde_json::json!({"sig": "x"}),
                ),
            )
            .await;
        assert_eq!(
            delivery,
            Delivery::Delivered {
                request_id: "r-1".into()
            }
        );
        assert!(rx.await.unwrap().success);
        assert_eq!(correlator.awaiting_count().await, 0);
    }

    #[tokio::test]
    async fn deliver_without_slot_reports_missing_channel() {
        let correlator = ResponseCorrelator::new(PendingPolicy::Supersede);
        let delivery = correlator
            .deliver(
                RequestKind::Encrypt,
                None,
                OutboundResponse::success_empty(RequestKind::Encrypt),
            )
            .await;
        assert_eq!(delivery, Delivery::MissingChannel);
    }

    #[tokio::test]
    async fn stale_request_id_is_not_delivered() {
        let correlator = ResponseCorrelator::new(PendingPolicy::Supersede);
        let (tx, _rx) = oneshot::channel();
        correlator
            .register(RequestKind::Broadcast, "r-2", origin(), tx)
            .await
            .unwrap();

        let delivery = correlator
            .deliver(
                RequestKind::Broadcast,
                Some("r-1"),
                OutboundResponse::success_empty(RequestKind::Broadcast),
            )
            .await;
        assert!(matches!(delivery, Delivery::Stale { .. }));
        assert!(correlator.is_awaiting(RequestKind::Broadcast).await);
    }

    #[tokio::test]
    async fn supersede_terminates_previous_caller() {
        let correlator = ResponseCorrelator::new(PendingPolicy::Supersede);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        correlator
            .register(RequestKind::SignMessage, "r-1", origin(), tx1)
            .await
            .unwrap();
        let reg = correlator
            .register(RequestKind::SignMessage, "r-2", origin(), tx2)
            .await
            .unwrap();

        assert_eq!(
            reg,
            Registration::Superseded {
                previous_request_id: "r-1".into()
            }
        );
        let first = rx1.await.unwrap();
        assert!(first.is_failure(&RequestError::Superseded));
        assert_eq!(
            correlator.peek(RequestKind::SignMessage).await.unwrap().request_id,
            "r-2"
        );
    }

    #[tokio::test]
    async fn reject_policy_hands_back_reply() {
        let correlator = ResponseCorrelator::new(PendingPolicy::Reject);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();

        correlator
            .register(RequestKind::Decrypt, "r-1", origin(), tx1)
            .await
            .unwrap();
        let Err(RegisterError::AlreadyPending {
            pending_request_id,
            reply,
        }) = correlator
            .register(RequestKind::Decrypt, "r-2", origin(), tx2)
            .await
        else {
            panic!("expected rejection");
        };
        assert_eq!(pending_request_id, "r-1");

        reply
            .send(OutboundResponse::failure(
                RequestKind::Decrypt,
                &RequestError::AlreadyPending,
            ))
            .unwrap();
        assert!(rx2.await.unwrap().is_failure(&RequestError::AlreadyPending));
        assert_eq!(
            correlator.peek(RequestKind::Decrypt).await.unwrap().request_id,
            "r-1"
        );
    }

    #[tokio::test]
    async fn finish_all_sweeps_every_kind() {
        let correlator = ResponseCorrelator::new(PendingPolicy::Supersede);
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        correlator
            .register(RequestKind::SendBsv, "r-1", origin(), tx1)
            .await
            .unwrap();
        correlator
            .register(RequestKind::Encrypt, "r-2", origin(), tx2)
            .await
            .unwrap();

        let mut finished = correlator
            .finish_all(SlotState::Dismissed, &RequestError::Dismissed)
            .await;
        finished.sort();
        assert_eq!(finished.len(), 2);
        assert!(rx1.await.unwrap().is_failure(&RequestError::Dismissed));
        assert!(rx2.await.unwrap().is_failure(&RequestError::Dismissed));
        assert_eq!(correlator.awaiting_count().await, 0);
    }

    #[tokio::test]
    async fn delivering_to_departed_caller_still_clears_slot() {
        let correlator = ResponseCorrelator::new(PendingPolicy::Supersede);
        let (tx, rx) = oneshot::channel();
        correlator
            .register(RequestKind::Encrypt, "r-1", origin(), tx)
            .await
            .unwrap();
        drop(rx);

        let delivery = correlator
            .deliver(
                RequestKind::Encrypt,
                None,
                OutboundResponse::success_empty(RequestKind::Encrypt),
            )
            .await;
        assert!(matches!(delivery, Delivery::Delivered { .. }));
        assert!(!correlator.is_awaiting(RequestKind::Encrypt).await);
    }
}
