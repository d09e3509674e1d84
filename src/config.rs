use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TrackerError};

/// Runtime configuration for the tracker.
///
/// Every field has a default, so a JSON file only needs the keys it changes:
///
/// ```json
/// { "stream_url": "wss://tracking.example.com/ws", "throttle_interval_ms": 250 }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub stream_url: String,
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub throttle_interval_ms: u64,
    pub history_limit: u32,
    pub reconnect_max_attempts: u32,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_multiplier: f64,
    pub presence_recheck_delay_ms: u64,
    pub stale_after_secs: u64,
    pub declutter_radius_m: f64,
    pub declutter_precision_deg: f64,
    pub request_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            stream_url: "ws://127.0.0.1:8080/tracking".to_string(),
            api_base_url: "http://127.0.0.1:8080/api/vehicles".to_string(),
            auth_token: None,
            throttle_interval_ms: 500,
            history_limit: 500,
            reconnect_max_attempts: 5,
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 10_000,
            reconnect_multiplier: 2.0,
            presence_recheck_delay_ms: 30_000,
            stale_after_secs: 120,
            declutter_radius_m: 12.0,
            declutter_precision_deg: 1e-6,
            request_timeout_secs: 30,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: TrackerConfig = serde_json::from_str(&raw)
            .map_err(|e| TrackerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.throttle_interval_ms == 0 {
            return Err(TrackerError::Config("throttle_interval_ms must be > 0".to_string()));
        }
        if self.history_limit == 0 {
            return Err(TrackerError::Config("history_limit must be > 0".to_string()));
        }
        if self.reconnect_max_attempts == 0 {
            return Err(TrackerError::Config("reconnect_max_attempts must be > 0".to_string()));
        }
        if !(self.reconnect_multiplier >= 1.0) {
            return Err(TrackerError::Config("reconnect_multiplier must be >= 1.0".to_string()));
        }
        if self.reconnect_max_delay_ms < self.reconnect_initial_delay_ms {
            return Err(TrackerError::Config(
                "reconnect_max_delay_ms must be >= reconnect_initial_delay_ms".to_string(),
            ));
        }
        if !(self.declutter_radius_m > 0.0) || !(self.declutter_precision_deg > 0.0) {
            return Err(TrackerError::Config(
                "declutter radius and precision must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn presence_recheck_delay(&self) -> Duration {
        Duration::from_millis(self.presence_recheck_delay_ms)
    }
}
