//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WebSocket server to.
    /// Override: `PARTYLINE_PORT`
    pub port: u16,

    /// Origins allowed to open a WebSocket connection or call the HTTP API.
    /// Override: `PARTYLINE_ALLOWED_ORIGINS` (comma-separated).
    pub allowed_origins: Vec<String>,

    /// Per-peer admission ceiling, in packets/second.
    /// Override: `PARTYLINE_MAX_PACKETS_PER_SEC`
    pub max_packets_per_sec: u32,

    /// Maximum number of frames retained per source for retransmission.
    /// Override: `PARTYLINE_HISTORY_MAX`
    pub history_max: usize,

    /// Maximum age, in milliseconds, of a retained frame.
    /// Override: `PARTYLINE_HISTORY_AGE_MS`
    pub history_age_ms: u64,

    /// Capacity of the event broadcast channel shared by all connections.
    pub event_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = partyline_core::HubConfig::default();
        Self {
            port: core.port,
            allowed_origins: core.allowed_origins,
            max_packets_per_sec: core.max_packets_per_sec,
            history_max: core.history_max,
            history_age_ms: core.history_age_ms,
            event_channel_capacity: core.event_channel_capacity,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PARTYLINE_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }

        if let Ok(val) = std::env::var("PARTYLINE_ALLOWED_ORIGINS") {
            self.allowed_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(val) = std::env::var("PARTYLINE_MAX_PACKETS_PER_SEC") {
            if let Ok(n) = val.parse() {
                self.max_packets_per_sec = n;
            }
        }

        if let Ok(val) = std::env::var("PARTYLINE_HISTORY_MAX") {
            if let Ok(n) = val.parse() {
                self.history_max = n;
            }
        }

        if let Ok(val) = std::env::var("PARTYLINE_HISTORY_AGE_MS") {
            if let Ok(n) = val.parse() {
                self.history_age_ms = n;
            }
        }
    }

    /// Converts to `partyline-core`'s config type.
    pub fn to_hub_config(&self) -> partyline_core::HubConfig {
        partyline_core::HubConfig {
            port: self.port,
            allowed_origins: self.allowed_origins.clone(),
            max_packets_per_sec: self.max_packets_per_sec,
            history_max: self.history_max,
            history_age_ms: self.history_age_ms,
            event_channel_capacity: self.event_channel_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_hub_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.max_packets_per_sec, 150);
    }

    #[test]
    fn env_override_applies() {
        std::env::set_var("PARTYLINE_PORT", "9100");
        let mut config = ServerConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.port, 9100);
        std::env::remove_var("PARTYLINE_PORT");
    }
}
