//! Runtime configuration.

use std::time::Duration;

use meshlink_client::ClientConfig;
use serde::{Deserialize, Serialize};

/// Configuration for [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Client state machine settings.
    #[serde(default)]
    pub client: ClientConfig,
    /// How often deadlines are checked (default 50 ms).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Buffered notifications per subscriber before the oldest are dropped
    /// (default 256).
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    /// Queued operations before callers wait (default 64).
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

fn default_tick_interval_ms() -> u64 {
    50
}
fn default_notification_capacity() -> usize {
    256
}
fn default_command_capacity() -> usize {
    64
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            tick_interval_ms: default_tick_interval_ms(),
            notification_capacity: default_notification_capacity(),
            command_capacity: default_command_capacity(),
        }
    }
}

impl RuntimeConfig {
    /// Runtime config wrapping `client` with default driver settings.
    pub fn with_client(client: ClientConfig) -> Self {
        Self { client, ..Self::default() }
    }

    /// Deadline check period. Never zero.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn nested_client_section() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"client": {"room": "lab"}, "tick_interval_ms": 10}"#).unwrap();

        assert_eq!(config.client.room, "lab");
        assert_eq!(config.client.fetch_timeout_ms, 3_000);
        assert_eq!(config.tick_interval(), Duration::from_millis(10));
        assert_eq!(config.notification_capacity, 256);
    }

    #[test]
    fn zero_tick_is_clamped() {
        let config = RuntimeConfig { tick_interval_ms: 0, ..RuntimeConfig::default() };
        assert_eq!(config.tick_interval(), Duration::from_millis(1));
    }
}
