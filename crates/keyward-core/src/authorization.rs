//! Authorization gate.
//!
//! Pure decision over a snapshot of the persisted state: which origins are
//! whitelisted, whether the wallet is locked, and how long it has been idle.
//! The gate never mutates anything; callers load a fresh [`AuthSnapshot`]
//! per request.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::origin::Origin;
use crate::protocol::{KindClass, RequestKind};

/// Default inactivity limit after which the session is no longer live.
pub const DEFAULT_INACTIVITY_LIMIT: Duration = Duration::from_secs(10 * 60);

/// A site the user has approved via `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub domain: String,
    pub icon: String,
}

/// Lock state as maintained by the wallet UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLockState {
    pub is_locked: bool,
    /// Unix milliseconds of the last observed user activity.
    pub last_active_time: i64,
}

impl Default for SessionLockState {
    fn default() -> Self {
        Self {
            is_locked: true,
            last_active_time: 0,
        }
    }
}

impl SessionLockState {
    /// Unlocked and within the inactivity window.
    pub fn is_live(&self, now_ms: i64, inactivity_limit: Duration) -> bool {
        let limit_ms = i64::try_from(inactivity_limit.as_millis()).unwrap_or(i64::MAX);
        !self.is_locked && now_ms.saturating_sub(self.last_active_time) < limit_ms
    }
}

/// Everything the gate needs, read from the state store.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub whitelist: Vec<WhitelistEntry>,
    pub lock: SessionLockState,
    pub inactivity_limit: Duration,
}

impl AuthSnapshot {
    pub fn is_whitelisted(&self, origin: &Origin) -> bool {
        self.whitelist.iter().any(|e| e.domain == origin.as_str())
    }

    pub fn is_session_live(&self, now_ms: i64) -> bool {
        self.lock.is_live(now_ms, self.inactivity_limit)
    }
}

/// Why a request was refused. Both render as `"Unauthorized!"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotWhitelisted,
    SessionNotLive,
}

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied { reason: DenyReason },
}

impl Authorization {
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// What to do with a `connect` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDisposition {
    /// Already whitelisted with a live session; answer without a human.
    AutoApprove,
    /// Ask the user. `authorized` tells the surface the site is known.
    NeedsApproval { authorized: bool },
}

/// Decide whether `origin` may issue `kind` right now.
///
/// No-auth kinds and `connect` always pass: the former never reach the
/// gate in the router, the latter is decided by a human.
pub fn authorize(
    kind: RequestKind,
    origin: &Origin,
    snapshot: &AuthSnapshot,
    now_ms: i64,
) -> Authorization {
    if matches!(kind.class(), KindClass::NoAuth) || kind == RequestKind::Connect {
        return Authorization::Allowed;
    }
    if !snapshot.is_whitelisted(origin) {
        return Authorization::Denied {
            reason: DenyReason::NotWhitelisted,
        };
    }
    if kind.requires_live_session() && !snapshot.is_session_live(now_ms) {
        return Authorization::Denied {
            reason: DenyReason::SessionNotLive,
        };
    }
    Authorization::Allowed
}

pub fn connect_disposition(
    origin: &Origin,
    snapshot: &AuthSnapshot,
    now_ms: i64,
) -> ConnectDisposition {
    let authorized = snapshot.is_whitelisted(origin);
    if authorized && snapshot.is_session_live(now_ms) {
        ConnectDisposition::AutoApprove
    } else {
        ConnectDisposition::NeedsApproval { authorized }
    }
}

/// Answer for the no-auth `isConnected` query.
pub fn is_connected(origin: &Origin, snapshot: &AuthSnapshot, now_ms: i64) -> bool {
    snapshot.is_session_live(now_ms) && snapshot.is_whitelisted(origin)
}
