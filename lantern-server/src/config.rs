//! Server configuration: YAML file, `LANTERN_*` environment overrides,
//! CLI flag overrides, validated defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::error::{LanternError, Result};
use crate::core::room::RoomConfig;
use crate::core::room_manager::{MAX_RING_CAPACITY, MIN_RING_CAPACITY};
use crate::ingest::wire::{MAX_TOKEN_LEN, MIN_TOKEN_LEN};

pub const MIN_STREAM_CAPACITY: usize = 100;
pub const MAX_STREAM_CAPACITY: usize = 100_000;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: Server,
    pub rooms: RoomLimits,
    pub auth: AuthConfig,
    pub timing: TimingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    /// Subscriber WebSocket + metrics port
    pub http_port: u16,
    /// Producer ingest TCP port
    pub ingest_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomLimits {
    pub max_entries_per_room: usize,
    pub max_stream_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub trace_timeout_ms: i64,
    pub trace_sweep_interval_ms: u64,
    pub entry_throttle_ms: u64,
    pub watch_throttle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8310,
            ingest_port: 8311,
        }
    }
}

impl Default for RoomLimits {
    fn default() -> Self {
        Self {
            max_entries_per_room: 10_000,
            max_stream_entries: 1_000,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            trace_timeout_ms: crate::core::trace::DEFAULT_TRACE_TIMEOUT_MS,
            trace_sweep_interval_ms: 30_000,
            entry_throttle_ms: crate::fanout::throttle::DEFAULT_ENTRY_THROTTLE_MS,
            watch_throttle_ms: crate::fanout::throttle::DEFAULT_WATCH_THROTTLE_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: Server::default(),
            rooms: RoomLimits::default(),
            auth: AuthConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `LANTERN_*` environment variable overrides
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Environment override logic with an injectable source
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(port) = get("LANTERN_HTTP_PORT").and_then(|v| v.parse().ok()) {
            self.server.http_port = port;
        }
        if let Some(port) = get("LANTERN_INGEST_PORT").and_then(|v| v.parse().ok()) {
            self.server.ingest_port = port;
        }
        if let Some(max) = get("LANTERN_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            self.rooms.max_entries_per_room = max;
        }
        if let Some(max) = get("LANTERN_MAX_STREAM_ENTRIES").and_then(|v| v.parse().ok()) {
            self.rooms.max_stream_entries = max;
        }
        if let Some(token) = get("LANTERN_AUTH_TOKEN") {
            self.auth.token = Some(token);
        }
        if let Some(required) = get("LANTERN_AUTH_REQUIRED").and_then(|v| v.parse().ok()) {
            self.auth.required = required;
        }
        if let Some(timeout) = get("LANTERN_TRACE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.timing.trace_timeout_ms = timeout;
        }
        if let Some(interval) = get("LANTERN_ENTRY_THROTTLE_MS").and_then(|v| v.parse().ok()) {
            self.timing.entry_throttle_ms = interval;
        }
        if let Some(interval) = get("LANTERN_WATCH_THROTTLE_MS").and_then(|v| v.parse().ok()) {
            self.timing.watch_throttle_ms = interval;
        }
    }

    /// Reject out-of-range limits and inconsistent auth settings
    pub fn validate(&self) -> Result<()> {
        if !(MIN_RING_CAPACITY..=MAX_RING_CAPACITY).contains(&self.rooms.max_entries_per_room) {
            return Err(LanternError::InvalidCapacity {
                requested: self.rooms.max_entries_per_room,
                min: MIN_RING_CAPACITY,
                max: MAX_RING_CAPACITY,
            });
        }
        if !(MIN_STREAM_CAPACITY..=MAX_STREAM_CAPACITY).contains(&self.rooms.max_stream_entries) {
            return Err(LanternError::InvalidCapacity {
                requested: self.rooms.max_stream_entries,
                min: MIN_STREAM_CAPACITY,
                max: MAX_STREAM_CAPACITY,
            });
        }
        match (&self.auth.token, self.auth.required) {
            (None, true) => {
                return Err(LanternError::InvalidCommand(
                    "auth.required is set but no auth.token is configured".to_string(),
                ));
            }
            (Some(token), _) if !(MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len()) => {
                return Err(LanternError::InvalidCommand(format!(
                    "auth.token must be {MIN_TOKEN_LEN}-{MAX_TOKEN_LEN} bytes"
                )));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn to_room_config(&self) -> RoomConfig {
        RoomConfig {
            max_entries: self.rooms.max_entries_per_room,
            max_stream_entries: self.rooms.max_stream_entries,
            trace_timeout_ms: self.timing.trace_timeout_ms,
        }
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    pub fn ingest_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.ingest_port)
    }
}
