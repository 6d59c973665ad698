//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.wagate/config.json`) and
//! environment. One credential set per gateway instance; the loop timeouts
//! are configurable because the idle/timeout disconnect policy is a
//! heuristic that may need tuning per deployment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Account credentials.
    #[serde(default)]
    pub credentials: Credentials,

    /// End-to-end encryption toggle, passed through to the transport.
    #[serde(default)]
    pub encryption: bool,

    /// Driver loop timing.
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Credential pair: account address and registered secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Account address (phone number or fully-qualified JID).
    #[serde(default)]
    pub address: String,

    /// Registered secret. Overridden by WAGATE_SECRET env when set.
    #[serde(default)]
    pub secret: String,
}

impl Credentials {
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            secret: secret.into(),
        }
    }
}

/// Driver loop timing: transport poll timeout and idle wall-clock budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    /// Upper bound for one transport pump, in milliseconds (default 100).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Wall-clock budget for one unit of work, in milliseconds (default
    /// 1000). When exceeded, the gateway forces a disconnect so a call can
    /// never hang if the transport stops reporting idle.
    #[serde(default = "default_idle_budget_ms")]
    pub idle_budget_ms: u64,
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_idle_budget_ms() -> u64 {
    1000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_budget_ms: default_idle_budget_ms(),
        }
    }
}

impl TimingConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_budget(&self) -> Duration {
        Duration::from_millis(self.idle_budget_ms)
    }
}

/// Resolve the credential secret: env WAGATE_SECRET overrides config.
pub fn resolve_secret(config: &Config) -> Option<String> {
    std::env::var("WAGATE_SECRET")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            let t = config.credentials.secret.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WAGATE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".wagate").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or WAGATE_CONFIG_PATH). Missing file
/// => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
