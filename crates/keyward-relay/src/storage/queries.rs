//! Database queries for the relay state store.

use std::time::Duration;

use keyward_core::authorization::{AuthSnapshot, SessionLockState, WhitelistEntry};
use keyward_core::clock::unix_timestamp_millis;
use keyward_core::protocol::{RequestKind, StateKey};
use serde_json::Value;

use super::db::{DatabaseError, StateStore};
use super::models::{
    ExchangeRateRecord, NewPending, PendingRecord, RecoveryReport, SessionLockRow, SurfaceRecord,
    WhitelistRow,
};

impl StateStore {
    // =========================================================================
    // Whitelist
    // =========================================================================

    /// List all whitelisted sites, oldest first.
    pub async fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>, DatabaseError> {
        let rows = sqlx::query_as::<_, WhitelistRow>("SELECT * FROM whitelist ORDER BY added_at")
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn whitelist_entry(
        &self,
        domain: &str,
    ) -> Result<Option<WhitelistEntry>, DatabaseError> {
        let row = sqlx::query_as::<_, WhitelistRow>("SELECT * FROM whitelist WHERE domain = ?")
            .bind(domain)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(Into::into))
    }

    /// Add a site, replacing the icon if the domain is already present.
    pub async fn upsert_whitelist(&self, domain: &str, icon: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r"
            INSERT INTO whitelist (domain, icon, added_at) VALUES (?, ?, ?)
            ON CONFLICT(domain) DO UPDATE SET icon = excluded.icon
            ",
        )
        .bind(domain)
        .bind(icon)
        .bind(unix_timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Remove a site. Returns whether it was present.
    pub async fn remove_whitelist(&self, domain: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM whitelist WHERE domain = ?")
            .bind(domain)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Session lock
    // =========================================================================

    pub async fn lock_state(&self) -> Result<SessionLockState, DatabaseError> {
        let row = sqlx::query_as::<_, SessionLockRow>(
            "SELECT is_locked, last_active_time FROM session_lock WHERE id = 1",
        )
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map_or_else(SessionLockState::default, Into::into))
    }

    /// Lock or unlock the wallet. Unlocking counts as activity.
    pub async fn set_locked(&self, locked: bool) -> Result<(), DatabaseError> {
        if locked {
            sqlx::query("UPDATE session_lock SET is_locked = 1 WHERE id = 1")
                .execute(self.pool())
                .await?;
        } else {
            sqlx::query("UPDATE session_lock SET is_locked = 0, last_active_time = ? WHERE id = 1")
                .bind(unix_timestamp_millis())
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    /// Record user activity now.
    pub async fn record_activity(&self) -> Result<(), DatabaseError> {
        self.set_last_active_time(unix_timestamp_millis()).await
    }

    pub async fn set_last_active_time(&self, unix_ms: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE session_lock SET last_active_time = ? WHERE id = 1")
            .bind(unix_ms)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Load everything the authorization gate needs.
    pub async fn auth_snapshot(
        &self,
        inactivity_limit: Duration,
    ) -> Result<AuthSnapshot, DatabaseError> {
        Ok(AuthSnapshot {
            whitelist: self.list_whitelist().await?,
            lock: self.lock_state().await?,
            inactivity_limit,
        })
    }

    // =========================================================================
    // Pending requests
    // =========================================================================

    /// Store the pending record for a kind, replacing any previous one.
    pub async fn put_pending(&self, pending: &NewPending<'_>) -> Result<(), DatabaseError> {
        let params = serde_json::to_string(pending.params)?;
        sqlx::query(
            r"
            INSERT OR REPLACE INTO pending_requests (kind, request_id, origin, params, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(pending.kind.as_str())
        .bind(pending.request_id)
        .bind(pending.origin)
        .bind(params)
        .bind(pending.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn pending(&self, kind: RequestKind) -> Result<Option<PendingRecord>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, PendingRecord>("SELECT * FROM pending_requests WHERE kind = ?")
                .bind(kind.as_str())
                .fetch_optional(self.pool())
                .await?,
        )
    }

    pub async fn list_pending(&self) -> Result<Vec<PendingRecord>, DatabaseError> {
        Ok(
            sqlx::query_as::<_, PendingRecord>("SELECT * FROM pending_requests ORDER BY created_at")
                .fetch_all(self.pool())
                .await?,
        )
    }

    /// Remove the pending record for a kind if it still belongs to `request_id`.
    pub async fn take_pending(
        &self,
        kind: RequestKind,
        request_id: &str,
    ) -> Result<Option<PendingRecord>, DatabaseError> {
        Ok(sqlx::query_as::<_, PendingRecord>(
            "DELETE FROM pending_requests WHERE kind = ? AND request_id = ? RETURNING *",
        )
        .bind(kind.as_str())
        .bind(request_id)
        .fetch_optional(self.pool())
        .await?)
    }

    /// Remove every pending record. Returns how many were removed.
    pub async fn clear_pending(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM pending_requests")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Approver surface handle
    // =========================================================================

    pub async fn surface_handle(&self) -> Result<Option<SurfaceRecord>, DatabaseError> {
        Ok(sqlx::query_as::<_, SurfaceRecord>(
            "SELECT surface_id, opened_at FROM approver_surface WHERE id = 1",
        )
        .fetch_optional(self.pool())
        .await?)
    }

    pub async fn set_surface_handle(&self, surface_id: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT OR REPLACE INTO approver_surface (id, surface_id, opened_at) VALUES (1, ?, ?)",
        )
        .bind(surface_id)
        .bind(unix_timestamp_millis())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Clear the stored handle. Returns whether one was present.
    pub async fn clear_surface_handle(&self) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM approver_surface WHERE id = 1")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Exchange rate cache
    // =========================================================================

    pub async fn cached_exchange_rate(&self) -> Result<Option<ExchangeRateRecord>, DatabaseError> {
        Ok(sqlx::query_as::<_, ExchangeRateRecord>(
            "SELECT rate, fetched_at FROM exchange_rate_cache WHERE id = 1",
        )
        .fetch_optional(self.pool())
        .await?)
    }

    pub async fn put_exchange_rate(&self, rate: f64, fetched_at: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT OR REPLACE INTO exchange_rate_cache (id, rate, fetched_at) VALUES (1, ?, ?)",
        )
        .bind(rate)
        .bind(fetched_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // =========================================================================
    // Wallet state
    // =========================================================================

    pub async fn wallet_state(&self, key: StateKey) -> Result<Option<Value>, DatabaseError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM wallet_state WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(self.pool())
            .await?;
        row.map(|(raw,)| serde_json::from_str(&raw).map_err(DatabaseError::from))
            .transpose()
    }

    pub async fn put_wallet_state(
        &self,
        key: StateKey,
        value: &Value,
    ) -> Result<(), DatabaseError> {
        sqlx::query("INSERT OR REPLACE INTO wallet_state (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key.as_str())
            .bind(serde_json::to_string(value)?)
            .bind(unix_timestamp_millis())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // =========================================================================
    // Startup recovery
    // =========================================================================

    /// Discard pending records and the surface handle left by a previous
    /// process. Their response channels did not survive the restart.
    pub async fn recover_stale_state(&self) -> Result<RecoveryReport, DatabaseError> {
        let pending_discarded = self.clear_pending().await?;
        let surface_discarded = self.clear_surface_handle().await?;
        Ok(RecoveryReport {
            pending_discarded,
            surface_discarded,
        })
    }
}
