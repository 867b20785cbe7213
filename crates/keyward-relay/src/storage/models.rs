//! Database models for the relay state store.

use serde::{Deserialize, Serialize};

use keyward_core::authorization::{SessionLockState, WhitelistEntry};
use keyward_core::protocol::{Params, RequestKind};

use super::db::DatabaseError;

/// Whitelist record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WhitelistRow {
    pub domain: String,
    pub icon: String,
    pub added_at: i64,
}

impl From<WhitelistRow> for WhitelistEntry {
    fn from(row: WhitelistRow) -> Self {
        Self {
            domain: row.domain,
            icon: row.icon,
        }
    }
}

/// Lock state record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionLockRow {
    pub is_locked: i64,
    pub last_active_time: i64,
}

impl From<SessionLockRow> for SessionLockState {
    fn from(row: SessionLockRow) -> Self {
        Self {
            is_locked: row.is_locked != 0,
            last_active_time: row.last_active_time,
        }
    }
}

/// Persisted form of a pending interactive request.
///
/// The surface reads this on load to render the request; the live response
/// channel exists only in relay memory.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingRecord {
    pub kind: String,
    pub request_id: String,
    pub origin: String,
    /// Request params as a JSON object.
    pub params: String,
    pub created_at: i64,
}

impl PendingRecord {
    pub fn request_kind(&self) -> Result<RequestKind, DatabaseError> {
        self.kind
            .parse()
            .map_err(|_| DatabaseError::Corrupt(format!("pending kind {}", self.kind)))
    }

    pub fn params_map(&self) -> Result<Params, DatabaseError> {
        Ok(serde_json::from_str(&self.params)?)
    }
}

/// Parameters for persisting a pending request.
pub struct NewPending<'a> {
    pub kind: RequestKind,
    pub request_id: &'a str,
    pub origin: &'a str,
    pub params: &'a Params,
    pub created_at: i64,
}

/// Approver surface handle record.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SurfaceRecord {
    pub surface_id: String,
    pub opened_at: i64,
}

/// Cached exchange rate record.
#[derive(Debug, Clone, Copy, PartialEq, sqlx::FromRow)]
pub struct ExchangeRateRecord {
    pub rate: f64,
    /// Unix milliseconds.
    pub fetched_at: i64,
}

/// What startup recovery discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub pending_discarded: u64,
    pub surface_discarded: bool,
}
