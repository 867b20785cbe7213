//! Response correlator.
//!
//! Holds the live reply channel of every interactive request that is
//! waiting on the approver surface, at most one per request kind, and
//! guarantees each channel is answered exactly once.

mod pending;
mod types;

pub use pending::ResponseCorrelator;
pub(crate) use pending::send_reply;
pub use types::{Delivery, Registration, RegisterError, ReplySender, SlotInfo, SlotState};
