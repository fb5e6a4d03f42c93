//! Client configuration.

use std::time::Duration;

use meshlink_proto::DEVICE_PREFIX;
use serde::{Deserialize, Serialize};

/// Client configuration.
///
/// Every field has a default, so an empty document deserializes to
/// [`ClientConfig::default`]. Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Mesh room to join (default `room`).
    #[serde(default = "default_room")]
    pub room: String,
    /// Peer id prefix identifying devices (default `SSG_`).
    #[serde(default = "default_device_prefix")]
    pub device_prefix: String,
    /// Deadline for each bootstrap phase (default 10 s).
    #[serde(default = "default_bootstrap_timeout_ms")]
    pub bootstrap_timeout_ms: u64,
    /// Deadline for a fetch (default 3 s).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Deadline for each streaming exchange (default 3 s).
    #[serde(default = "default_streaming_timeout_ms")]
    pub streaming_timeout_ms: u64,
    /// Keepalive period per device connection (default 25 s).
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
}

fn default_room() -> String {
    "room".to_string()
}
fn default_device_prefix() -> String {
    DEVICE_PREFIX.to_string()
}
fn default_bootstrap_timeout_ms() -> u64 {
    10_000
}
fn default_fetch_timeout_ms() -> u64 {
    3_000
}
fn default_streaming_timeout_ms() -> u64 {
    3_000
}
fn default_keepalive_interval_ms() -> u64 {
    25_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            room: default_room(),
            device_prefix: default_device_prefix(),
            bootstrap_timeout_ms: default_bootstrap_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            streaming_timeout_ms: default_streaming_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
        }
    }
}

impl ClientConfig {
    /// Config for `room` with default timeouts.
    pub fn for_room(room: impl Into<String>) -> Self {
        Self { room: room.into(), ..Self::default() }
    }

    /// Per-phase bootstrap deadline.
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    /// Default fetch deadline.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Streaming exchange deadline.
    pub fn streaming_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming_timeout_ms)
    }

    /// Keepalive period.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.device_prefix, "SSG_");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(config.keepalive_interval(), Duration::from_secs(25));
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"room": "r1", "fetch_timeout_ms": 500}"#).unwrap();
        assert_eq!(config.room, "r1");
        assert_eq!(config.fetch_timeout(), Duration::from_millis(500));
        assert_eq!(config.bootstrap_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<ClientConfig>(r#"{"rooom": "r1"}"#).is_err());
    }
}
