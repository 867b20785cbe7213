//! Error types for Keyward core library.

use thiserror::Error;

/// Result type alias using Keyward Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Keyward operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire protocol framing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Origin failed validation
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal failures reported to a page caller.
///
/// The display strings are the exact `error` values carried by an
/// [`OutboundResponse`](crate::protocol::OutboundResponse).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Malformed or missing request params.
    #[error("Must provide valid params!")]
    Validation,

    /// Origin not whitelisted or session not live.
    #[error("Unauthorized!")]
    Unauthorized,

    /// The approver surface was closed without a decision.
    #[error("User dismissed the request!")]
    Dismissed,

    /// The user explicitly declined the request.
    #[error("User declined the request!")]
    Declined,

    /// A newer request of the same kind took over the slot.
    #[error("Request superseded by a newer request!")]
    Superseded,

    /// A request of the same kind is still awaiting a decision.
    #[error("A request of this kind is already awaiting approval!")]
    AlreadyPending,

    /// The approver surface could not be opened.
    #[error("Failed to open approval window: {0}")]
    SurfaceUnavailable(String),

    /// The relay dropped the reply channel without answering.
    #[error("Request was dropped before a response was produced")]
    Dropped,

    /// Internal fault while composing a response.
    #[error("{0}")]
    Handler(String),
}
