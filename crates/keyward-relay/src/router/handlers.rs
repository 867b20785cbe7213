//! Immediate handlers answered straight from the state store.

use serde_json::{Value, json};
use tracing::{debug, info};

use keyward_core::protocol::{Params, RequestKind, StateKey};
use keyward_core::{Origin, RequestError};

use super::Router;

impl Router {
    /// Compute the data of an immediate request that passed the gate.
    pub(super) async fn immediate(
        &self,
        kind: RequestKind,
        origin: &Origin,
        params: &Params,
        now_ms: i64,
    ) -> Result<Value, RequestError> {
        match kind {
            RequestKind::Disconnect => {
                let removed = self
                    .store
                    .remove_whitelist(origin.as_str())
                    .await
                    .map_err(fault)?;
                info!(origin = %origin, removed, "Site disconnected");
                Ok(json!(true))
            }
            RequestKind::GetPubKeys => self.app_state_field("pubKeys").await,
            RequestKind::GetBalance => self.app_state_field("balance").await,
            RequestKind::GetAddresses => self.app_state_field("addresses").await,
            RequestKind::GetOrdinals => self.app_state_field("ordinals").await,
            RequestKind::GetSocialProfile => self.state(StateKey::SocialProfile).await,
            RequestKind::GetPaymentUtxos => self.state(StateKey::PaymentUtxos).await,
            RequestKind::GetTaggedKeys => self.tagged_keys(params).await,
            RequestKind::GetExchangeRate => {
                let rate = self.rates.rate(&self.store, now_ms).await.map_err(fault)?;
                Ok(json!(rate))
            }
            other => Err(RequestError::Handler(format!(
                "{other} is not an immediate request"
            ))),
        }
    }

    async fn state(&self, key: StateKey) -> Result<Value, RequestError> {
        self.store
            .wallet_state(key)
            .await
            .map_err(fault)?
            .ok_or_else(|| missing(key.as_str()))
    }

    async fn app_state_field(&self, field: &str) -> Result<Value, RequestError> {
        let mut app_state = self.state(StateKey::AppState).await?;
        match app_state.get_mut(field).map(Value::take) {
            Some(Value::Null) | None => Err(missing(field)),
            Some(value) => Ok(value),
        }
    }

    /// The wallet's identity public key, if the wallet has published it.
    pub(super) async fn identity_pub_key(&self) -> Option<String> {
        let pub_keys = self.app_state_field("pubKeys").await.ok()?;
        identity_from(&pub_keys)
    }

    async fn tagged_keys(&self, params: &Params) -> Result<Value, RequestError> {
        let label = params
            .get("label")
            .and_then(Value::as_str)
            .ok_or(RequestError::Validation)?;
        let ids: Option<Vec<&str>> = params
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect());

        let tags = self.state(StateKey::DerivationTags).await?;
        let Value::Array(tags) = tags else {
            return Err(RequestError::Handler("Derivation tags are malformed".into()));
        };

        let matched: Vec<Value> = tags
            .into_iter()
            .filter(|tag| tag.get("label").and_then(Value::as_str) == Some(label))
            .filter(|tag| match (&ids, tag.get("id").and_then(Value::as_str)) {
                (None, _) => true,
                (Some(ids), Some(id)) => ids.contains(&id),
                (Some(_), None) => false,
            })
            .collect();
        debug!(label, count = matched.len(), "Tagged keys lookup");
        Ok(Value::Array(matched))
    }
}

/// Pull `identityPubKey` out of a `pubKeys` object.
pub(super) fn identity_from(pub_keys: &Value) -> Option<String> {
    pub_keys
        .get("identityPubKey")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

fn missing(what: &str) -> RequestError {
    RequestError::Handler(format!("No {what} available"))
}

pub(super) fn fault(e: impl std::fmt::Display) -> RequestError {
    RequestError::Handler(e.to_string())
}
