//! Hub-wide configuration and presence snapshot types.

use serde::Serialize;

use crate::protocol_constants::{
    DEFAULT_HISTORY_AGE_MS, DEFAULT_HISTORY_MAX, DEFAULT_MAX_PACKETS_PER_SEC, DEFAULT_PORT,
    EVENT_CHANNEL_CAPACITY,
};

/// Hub-wide tunables, populated from [`crate::protocol_constants`] defaults
/// and overridable via the server binary's config/env/CLI layering.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub max_packets_per_sec: u32,
    pub history_max: usize,
    pub history_age_ms: u64,
    pub event_channel_capacity: usize,
}

impl HubConfig {
    /// Rejects configuration that would make the hub meaningless to run.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_packets_per_sec == 0 {
            return Err("max_packets_per_sec must be > 0".to_string());
        }
        if self.history_max == 0 {
            return Err("history_max must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            allowed_origins: vec!["http://localhost".to_string(), "http://127.0.0.1".to_string()],
            max_packets_per_sec: DEFAULT_MAX_PACKETS_PER_SEC,
            history_max: DEFAULT_HISTORY_MAX,
            history_age_ms: DEFAULT_HISTORY_AGE_MS,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// A peer's role in the session, per §3 "Source state" / presence registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Idle,
    Source,
    Listener,
}

/// One row of the presence snapshot sent as `deviceList` and served from
/// `/status` and `/devices`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub role: PeerRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listening_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_protocol_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.port, 3001);
        assert_eq!(config.max_packets_per_sec, 150);
        assert_eq!(config.history_max, 400);
        assert_eq!(config.history_age_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_ceiling() {
        let config = HubConfig {
            max_packets_per_sec: 0,
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
