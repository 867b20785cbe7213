//! Keyward Core Library
//!
//! Shared functionality for Keyward components:
//! - Page/surface wire protocol and NDJSON framing
//! - Origin validation and the authorization gate
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod authorization;
pub mod clock;
pub mod config;
pub mod error;
pub mod origin;
pub mod protocol;
pub mod tracing_init;

pub use authorization::{AuthSnapshot, Authorization, ConnectDisposition};
pub use config::Config;
pub use error::{Error, RequestError, Result};
pub use origin::Origin;
pub use protocol::{KindClass, OutboundResponse, RequestKind};
