//! Bridge configuration
//!
//! Loading flow:
//! 1. Start with compiled [`BridgeConfig::default()`]
//! 2. If a config file exists (`AUTON8_CONFIG` or `./auton8.json`), deep-merge it over the defaults
//! 3. Apply `AUTON8_*` environment overrides (highest priority)
//!
//! Invalid environment values are ignored with a warning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use auton8_shared::{endpoints, link, nav};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Default config file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "auton8.json";

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{key} = {value} is out of range ({min}..={max})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Accepted range for `tick_interval_ms`
pub const TICK_INTERVAL_RANGE_MS: (u64, u64) = (10, 1_000);

/// Accepted range for the reconnect delay and the connect/request timeouts
pub const LINK_DURATION_RANGE_MS: (u64, u64) = (100, 600_000);

/// Which transport backend carries the envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// HTTP auth + Server-Sent Events inbound + HTTP POST outbound
    #[default]
    HttpSse,
    /// Length-prefixed envelopes over a single TCP connection
    TcpBroker,
}

/// Logical endpoint names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointNames {
    pub cmd: String,
    pub events: String,
    pub hud: String,
    pub baritone_state: String,
}

impl Default for EndpointNames {
    fn default() -> Self {
        Self {
            cmd: endpoints::CMD.into(),
            events: endpoints::EVENTS.into(),
            hud: endpoints::HUD.into(),
            baritone_state: endpoints::NAV_STATE.into(),
        }
    }
}

/// Top-level bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub backend: BackendKind,
    /// Base URL of the HTTP+SSE API
    pub base_url: String,
    /// `host:port` of the TCP broker
    pub broker_addr: String,
    pub client_id: String,
    pub auth_key: String,
    pub endpoints: EndpointNames,
    /// When false, every command is ignored at intake
    pub allow_nav_commands: bool,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// Bound on a single auth or publish request
    pub request_timeout_ms: u64,
    pub tick_interval_ms: u64,
    /// Drive a simulated avatar instead of a game host
    pub simulate: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::HttpSse,
            base_url: "http://127.0.0.1:5679/api".into(),
            broker_addr: "127.0.0.1:1883".into(),
            client_id: "auton8-bridge".into(),
            auth_key: String::new(),
            endpoints: EndpointNames::default(),
            allow_nav_commands: true,
            reconnect_delay_ms: link::RECONNECT_DELAY_MS,
            connect_timeout_ms: link::CONNECT_TIMEOUT_MS,
            request_timeout_ms: link::REQUEST_TIMEOUT_MS,
            tick_interval_ms: nav::TICK_INTERVAL_MS,
            simulate: false,
        }
    }
}

impl BridgeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject durations the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (tick_min, tick_max) = TICK_INTERVAL_RANGE_MS;
        let (link_min, link_max) = LINK_DURATION_RANGE_MS;
        check_range("tick_interval_ms", self.tick_interval_ms, tick_min, tick_max)?;
        check_range("reconnect_delay_ms", self.reconnect_delay_ms, link_min, link_max)?;
        check_range("connect_timeout_ms", self.connect_timeout_ms, link_min, link_max)?;
        check_range("request_timeout_ms", self.request_timeout_ms, link_min, link_max)
    }
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { key, value, min, max })
    }
}

/// Resolve the config file path (`AUTON8_CONFIG` or `./auton8.json`)
pub fn config_path() -> PathBuf {
    std::env::var("AUTON8_CONFIG")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load configuration from the default path with env overrides
pub fn load_config() -> Result<BridgeConfig, ConfigError> {
    let mut config = load_config_from_path(&config_path())?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Load configuration from a specific path, without env overrides.
///
/// A missing file yields the defaults; invalid JSON and out-of-range
/// durations are errors.
pub fn load_config_from_path(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let defaults = serde_json::to_value(BridgeConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let config: BridgeConfig = serde_json::from_value(merged)?;
    config.validate()?;
    Ok(config)
}

/// Recursive deep merge: objects merge per key, everything else is
/// replaced by `source`, nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `AUTON8_*` overrides read through `lookup`
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("AUTON8_BACKEND") {
        match parse_backend(&v) {
            Some(kind) => config.backend = kind,
            None => warn!(key = "AUTON8_BACKEND", value = %v, "invalid backend, ignoring"),
        }
    }
    if let Some(v) = read("AUTON8_BASE_URL") {
        config.base_url = v;
    }
    if let Some(v) = read("AUTON8_BROKER_ADDR") {
        config.broker_addr = v;
    }
    if let Some(v) = read("AUTON8_CLIENT_ID") {
        config.client_id = v;
    }
    if let Some(v) = read("AUTON8_AUTH_KEY") {
        config.auth_key = v;
    }
    if let Some(v) = read("AUTON8_ALLOW_NAV") {
        match parse_bool(&v) {
            Some(b) => config.allow_nav_commands = b,
            None => warn!(key = "AUTON8_ALLOW_NAV", value = %v, "invalid boolean, ignoring"),
        }
    }
    if let Some(v) = read("AUTON8_TICK_MS") {
        let (min, max) = TICK_INTERVAL_RANGE_MS;
        match parse_u64_range(&v, min, max) {
            Some(ms) => config.tick_interval_ms = ms,
            None => warn!(key = "AUTON8_TICK_MS", value = %v, "invalid tick interval, ignoring"),
        }
    }
    if let Some(v) = read("AUTON8_SIMULATE") {
        match parse_bool(&v) {
            Some(b) => config.simulate = b,
            None => warn!(key = "AUTON8_SIMULATE", value = %v, "invalid boolean, ignoring"),
        }
    }
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, case-insensitive
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn parse_backend(val: &str) -> Option<BackendKind> {
    serde_json::from_value(Value::String(val.trim().to_lowercase())).ok()
}
