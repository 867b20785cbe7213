//! Configuration resolution for Keyward.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/keyward/settings.json)
//! 3. Explicit config file (--config)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::authorization::DEFAULT_INACTIVITY_LIMIT;
use crate::error::{Error, Result};

/// Complete Keyward configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub exchange_rate: ExchangeRateConfig,
    #[serde(default)]
    pub pending: PendingSettings,
}

/// Relay process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Capacity of the relay event queue.
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
            queue_capacity: 256,
        }
    }
}

/// Session liveness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub inactivity_limit_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_limit_secs: DEFAULT_INACTIVITY_LIMIT.as_secs(),
        }
    }
}

impl SessionConfig {
    pub const fn inactivity_limit(&self) -> Duration {
        Duration::from_secs(self.inactivity_limit_secs)
    }
}

/// Approver surface launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Program that renders the approval UI.
    pub command: PathBuf,
    pub args: Vec<String>,
    pub width: u32,
    pub height: u32,
    /// Entry view loaded by the surface.
    pub entry_view: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("keyward-approver"),
            args: Vec::new(),
            width: 392,
            height: 567,
            entry_view: "index.html".to_string(),
        }
    }
}

/// Exchange-rate lookup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeRateConfig {
    pub endpoint: String,
    /// Cached rates younger than this are served without a fetch.
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ExchangeRateConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.whatsonchain.com/v1/bsv/main/exchangerate".to_string(),
            cache_ttl_secs: 5 * 60,
            request_timeout_secs: 10,
        }
    }
}

/// What happens when a second interactive request of a kind arrives while
/// the first is still awaiting a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PendingPolicy {
    /// Last request wins; the earlier caller is told it was superseded.
    #[default]
    Supersede,
    /// The newcomer is refused; the earlier request keeps its slot.
    Reject,
}

impl std::str::FromStr for PendingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "supersede" => Ok(Self::Supersede),
            "reject" => Ok(Self::Reject),
            other => Err(Error::Config(format!("Unknown pending policy: {other}"))),
        }
    }
}

/// Pending-request configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PendingSettings {
    pub policy: PendingPolicy,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let global = global_config_path().filter(|p| p.exists());
    let mut config = load_layers(global.as_deref(), explicit)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("keyward").join("settings.json"))
}

/// Default database path: ~/.keyward/relay.db
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".keyward").join("relay.db"))
}

/// Merge the files field by field, later files winning, then fill the gaps
/// with defaults.
fn load_layers(global: Option<&Path>, explicit: Option<&Path>) -> Result<Config> {
    let mut merged = Value::Object(Map::new());
    for path in global.into_iter().chain(explicit) {
        merge_value(&mut merged, read_layer(path)?);
    }
    serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

fn read_layer(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_value(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("KEYWARD_EXCHANGE_RATE_URL") {
        config.exchange_rate.endpoint = val;
    }
    if let Ok(val) = std::env::var("KEYWARD_EXCHANGE_RATE_TTL_SECS")
        && let Ok(n) = val.parse()
    {
        config.exchange_rate.cache_ttl_secs = n;
    }
    if let Ok(val) = std::env::var("KEYWARD_QUEUE_CAPACITY")
        && let Ok(n) = val.parse()
    {
        config.relay.queue_capacity = n;
    }
}
