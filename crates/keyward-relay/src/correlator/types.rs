//! Correlator types.

use std::time::Instant;

use tokio::sync::oneshot;

use keyward_core::protocol::{OutboundResponse, RequestKind};
use keyward_core::Origin;

/// Channel that carries the single response back to a page caller.
pub type ReplySender = oneshot::Sender<OutboundResponse>;

/// Terminal state of a pending slot.
///
/// A slot is awaiting a decision for as long as the correlator holds it, and
/// leaves through exactly one of these when its channel is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Answered with the surface's decision.
    Resolved,
    /// Surface closed before deciding.
    Dismissed,
    /// Replaced by a newer request of the same kind.
    Superseded,
    /// Could not be decided (surface failed to open, relay stopped).
    Failed,
}

impl SlotState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
        }
    }
}

/// Identifying data of an occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub kind: RequestKind,
    pub request_id: String,
    pub origin: Origin,
}

/// Outcome of registering a new slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The kind had no pending request.
    Fresh,
    /// An earlier request was terminated in favour of this one.
    Superseded { previous_request_id: String },
}

/// Registration refused under the reject policy.
#[derive(Debug)]
pub enum RegisterError {
    /// The reply channel is handed back so the caller can still be answered.
    AlreadyPending {
        pending_request_id: String,
        reply: ReplySender,
    },
}

/// Outcome of delivering a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered { request_id: String },
    /// No slot is registered for the kind.
    MissingChannel,
    /// The slot belongs to a different request.
    Stale { pending_request_id: String },
}

pub(super) struct PendingSlot {
    pub(super) info: SlotInfo,
    pub(super) created_at: Instant,
    pub(super) reply: ReplySender,
}
