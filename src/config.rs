//! Application configuration
//!
//! Defaults point at the production exchange endpoints; an optional YAML
//! file overlays the defaults, and `ORDERTOOLS_*` environment variables win
//! over both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Bounds for the settling window; the transport gives no replay-completion
/// marker, so the window is a heuristic and anything longer just wastes time
const SETTLE_SECS_MIN: u64 = 1;
const SETTLE_SECS_MAX: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Brokerage REST endpoint
    pub rest_url: String,
    /// Order-event feed endpoint
    pub ws_url: String,
    /// Channel that replays and updates the user's orders
    pub channel: String,
    /// Settling window after subscribing, in seconds
    pub settle_secs: u64,
    /// Page size for cursor-paginated REST listings
    pub page_limit: u32,
    /// Per-request HTTP timeout, in seconds
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://api.coinbase.com".to_string(),
            ws_url: "wss://advanced-trade-ws.coinbase.com".to_string(),
            channel: "user".to_string(),
            settle_secs: 5,
            page_limit: 250,
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then the YAML file if given, then
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.clamp_settle_window();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ORDERTOOLS_REST_URL") {
            self.rest_url = url;
        }
        if let Ok(url) = std::env::var("ORDERTOOLS_WS_URL") {
            self.ws_url = url;
        }
        if let Ok(secs) = std::env::var("ORDERTOOLS_SETTLE_SECS") {
            match secs.parse() {
                Ok(secs) => self.settle_secs = secs,
                Err(_) => warn!(value = %secs, "Ignoring unparsable ORDERTOOLS_SETTLE_SECS"),
            }
        }
    }

    fn clamp_settle_window(&mut self) {
        let clamped = self.settle_secs.clamp(SETTLE_SECS_MIN, SETTLE_SECS_MAX);
        if clamped != self.settle_secs {
            warn!(
                requested = self.settle_secs,
                used = clamped,
                "Settling window out of range"
            );
            self.settle_secs = clamped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.channel, "user");
        assert_eq!(config.settle_secs, 5);
        assert!(config.rest_url.starts_with("https://"));
        assert!(config.ws_url.starts_with("wss://"));
    }

    #[test]
    fn test_yaml_overlay_keeps_unset_fields() {
        let yaml = "settle_secs: 3\nchannel: user\n";
        let mut config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.clamp_settle_window();
        assert_eq!(config.settle_secs, 3);
        // Unset fields fall back to defaults
        assert_eq!(config.page_limit, 250);
    }

    #[test]
    fn test_settle_window_is_clamped() {
        let mut config = AppConfig {
            settle_secs: 120,
            ..Default::default()
        };
        config.clamp_settle_window();
        assert_eq!(config.settle_secs, SETTLE_SECS_MAX);

        config.settle_secs = 0;
        config.clamp_settle_window();
        assert_eq!(config.settle_secs, SETTLE_SECS_MIN);
    }
}
