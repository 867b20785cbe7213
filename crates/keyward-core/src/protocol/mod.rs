//! Wire protocol between the page, the relay, and the approver surface.
//!
//! Frames are newline-delimited JSON. The reader is tolerant: unknown
//! fields are ignored and unknown surface actions are surfaced as
//! [`SurfaceMessage::Unknown`] rather than rejected.

mod parser;
mod types;

pub use parser::{
    encode_line, parse_page_line, parse_page_value, parse_surface_line, parse_surface_value,
};
pub use types::*;
