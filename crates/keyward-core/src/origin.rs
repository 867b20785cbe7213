//! Requesting-site origin.
//!
//! The page bridge attaches the hostname it observes, but the relay still
//! treats it as untrusted input: it is normalized and validated here before
//! the authorization gate ever sees it.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("static regex is valid")
});

const MAX_HOSTNAME_LEN: usize = 253;

/// A validated, lower-cased hostname; the unit of authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    /// Normalize and validate a hostname or URL.
    ///
    /// Scheme, credentials, port, path, query and fragment are stripped.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let rest = trimmed.split_once("://").map_or(trimmed, |(_, rest)| rest);
        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = host_port.split_once(':').map_or(host_port, |(h, _)| h);
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        if host.is_empty() || host.len() > MAX_HOSTNAME_LEN || !HOSTNAME_RE.is_match(&host) {
            return Err(Error::InvalidOrigin(raw.to_string()));
        }
        Ok(Self(host))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
