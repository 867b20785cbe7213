//! Keyward Relay Library
//!
//! The request broker between untrusted pages and the wallet:
//! - Request routing through the authorization gate
//! - Response correlation for requests awaiting a human decision
//! - Approver surface lifecycle (launch, reuse, dismissal)
//! - `SQLite` state store for whitelist, lock state and pending requests
//! - Page bridge and NDJSON page link

pub mod bridge;
pub mod correlator;
pub mod host;
pub mod price;
pub mod relay;
pub mod router;
pub mod storage;
pub mod surface;
