//! Protocol types shared by the relay, the page bridge, and surfaces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, RequestError};

/// Request parameters as sent by the page.
pub type Params = Map<String, Value>;

/// Every capability a page can ask the relay for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Connect,
    Disconnect,
    IsConnected,
    GetPubKeys,
    GetBalance,
    GetAddresses,
    GetOrdinals,
    SendBsv,
    TransferOrdinal,
    PurchaseOrdinal,
    SignMessage,
    Broadcast,
    GetSignatures,
    GetSocialProfile,
    GetPaymentUtxos,
    GetExchangeRate,
    GenerateTaggedKeys,
    GetTaggedKeys,
    Encrypt,
    Decrypt,
}

/// How the relay answers a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClass {
    /// Answered from local state without consulting the gate.
    NoAuth,
    /// Gated, then answered directly from state.
    Immediate,
    /// Gated, then decided by a human on the approver surface.
    Interactive,
}

impl RequestKind {
    pub const ALL: [Self; 20] = [
        Self::Connect,
        Self::Disconnect,
        Self::IsConnected,
        Self::GetPubKeys,
        Self::GetBalance,
        Self::GetAddresses,
        Self::GetOrdinals,
        Self::SendBsv,
        Self::TransferOrdinal,
        Self::PurchaseOrdinal,
        Self::SignMessage,
        Self::Broadcast,
        Self::GetSignatures,
        Self::GetSocialProfile,
        Self::GetPaymentUtxos,
        Self::GetExchangeRate,
        Self::GenerateTaggedKeys,
        Self::GetTaggedKeys,
        Self::Encrypt,
        Self::Decrypt,
    ];

    /// Wire name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::IsConnected => "isConnected",
            Self::GetPubKeys => "getPubKeys",
            Self::GetBalance => "getBalance",
            Self::GetAddresses => "getAddresses",
            Self::GetOrdinals => "getOrdinals",
            Self::SendBsv => "sendBsv",
            Self::TransferOrdinal => "transferOrdinal",
            Self::PurchaseOrdinal => "purchaseOrdinal",
            Self::SignMessage => "signMessage",
            Self::Broadcast => "broadcast",
            Self::GetSignatures => "getSignatures",
            Self::GetSocialProfile => "getSocialProfile",
            Self::GetPaymentUtxos => "getPaymentUtxos",
            Self::GetExchangeRate => "getExchangeRate",
            Self::GenerateTaggedKeys => "generateTaggedKeys",
            Self::GetTaggedKeys => "getTaggedKeys",
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }

    pub const fn class(self) -> KindClass {
        match self {
            Self::IsConnected => KindClass::NoAuth,
            Self::Disconnect
            | Self::GetPubKeys
            | Self::GetBalance
            | Self::GetAddresses
            | Self::GetOrdinals
            | Self::GetSocialProfile
            | Self::GetPaymentUtxos
            | Self::GetExchangeRate
            | Self::GetTaggedKeys => KindClass::Immediate,
            Self::Connect
            | Self::SendBsv
            | Self::TransferOrdinal
            | Self::PurchaseOrdinal
            | Self::SignMessage
            | Self::Broadcast
            | Self::GetSignatures
            | Self::GenerateTaggedKeys
            | Self::Encrypt
            | Self::Decrypt => KindClass::Interactive,
        }
    }

    pub const fn is_interactive(self) -> bool {
        matches!(self.class(), KindClass::Interactive)
    }

    /// Read-only queries additionally require a live session.
    pub const fn requires_live_session(self) -> bool {
        matches!(self.class(), KindClass::Immediate) && !matches!(self, Self::Disconnect)
    }

    /// Resolve a surface reply action (e.g. `signMessageResponse`).
    pub fn from_reply_action(action: &str) -> Option<Self> {
        action
            .strip_suffix("Response")
            .and_then(|k| k.parse::<Self>().ok())
            .filter(|k| k.is_interactive())
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Protocol(format!("Unknown request kind: {s}")))
    }
}

/// The single terminal answer to a page request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundResponse {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutboundResponse {
    pub const fn success(kind: RequestKind, data: Value) -> Self {
        Self {
            kind,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub const fn success_empty(kind: RequestKind) -> Self {
        Self {
            kind,
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(kind: RequestKind, error: &RequestError) -> Self {
        Self {
            kind,
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    /// Whether this is a failure carrying exactly `error`.
    pub fn is_failure(&self, error: &RequestError) -> bool {
        !self.success && self.error.as_deref() == Some(error.to_string().as_str())
    }
}

/// Page → relay frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEnvelope {
    /// Bridge-local correlation id.
    pub id: String,
    pub action: RequestKind,
    #[serde(default)]
    pub params: Params,
}

/// Relay → page frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: String,
    #[serde(flatten)]
    pub response: OutboundResponse,
}

/// A user decision on a `connect` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Declined,
}

/// Session events reported by the wallet UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Lock,
    Unlock,
    Activity,
}

/// Wallet-state entries the surface may publish for immediate handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    AppState,
    SocialProfile,
    PaymentUtxos,
    DerivationTags,
}

impl StateKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppState => "appState",
            Self::SocialProfile => "socialProfile",
            Self::PaymentUtxos => "paymentUtxos",
            Self::DerivationTags => "derivationTags",
        }
    }
}

impl FromStr for StateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "appState" => Ok(Self::AppState),
            "socialProfile" => Ok(Self::SocialProfile),
            "paymentUtxos" => Ok(Self::PaymentUtxos),
            "derivationTags" => Ok(Self::DerivationTags),
            other => Err(Error::Protocol(format!("Unknown state key: {other}"))),
        }
    }
}

/// A decision reply from the approver surface for one interactive kind.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceReply {
    pub kind: RequestKind,
    /// Correlation id of the slot being answered, when the surface echoes it.
    pub request_id: Option<String>,
    pub payload: Params,
}

impl SurfaceReply {
    pub fn new(kind: RequestKind, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        Self {
            kind,
            request_id: None,
            payload,
        }
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Failure text reported by the surface, if any.
    pub fn error(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }

    pub fn decision(&self) -> Option<Decision> {
        self.payload
            .get("decision")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn into_data(self) -> Value {
        Value::Object(self.payload)
    }
}

/// Anything the approver surface can send to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceMessage {
    Reply(SurfaceReply),
    Session(SessionEvent),
    StateUpdate { key: StateKey, value: Value },
    Unknown { action: String, payload: Value },
}
