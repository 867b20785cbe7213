//! Persistent state store for the relay.
//!
//! `SQLite`-backed key state that survives relay restarts: the whitelist,
//! lock state, one pending record per interactive kind, the approver
//! surface handle, the exchange-rate cache, and published wallet state.

mod db;
mod models;
mod queries;

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests;

pub use db::{DatabaseError, StateStore};
pub use models::*;
