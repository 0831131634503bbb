//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a sync connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Seconds to wait for an unwatch acknowledgement before forcing a
    /// session to `Closed` locally (default `10`).
    pub unwatch_timeout_secs: u64,
}

impl ClientConfig {
    /// Unwatch timeout as a [`Duration`].
    #[must_use]
    pub fn unwatch_timeout(&self) -> Duration {
        Duration::from_secs(self.unwatch_timeout_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            unwatch_timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_unwatch_timeout() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.unwatch_timeout_secs, 10);
        assert_eq!(cfg.unwatch_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ClientConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.unwatch_timeout_secs, cfg.unwatch_timeout_secs);
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"unwatch_timeout_secs": 3}"#;
        let cfg: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.unwatch_timeout_secs, 3);
    }
}
