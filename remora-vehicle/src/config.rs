use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use remora_common::config::{expand_home, BaseConfig, LoadConfig};

use serde::Deserialize;

pub static CONFIG: LazyLock<VehicleConfig> =
    LazyLock::new(|| VehicleConfig::load_config("vehicle").expect("Failed to load configuration"));

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    pub log_level: String,
    /// Base URL of the remora server, e.g. `http://localhost:8887`.
    pub remote_url: String,
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// CSV file receiving one `time,lag` row per cycle.
    #[serde(default)]
    pub lag_log: Option<String>,
}

fn default_loop_interval_ms() -> u64 {
    50
}

fn default_request_timeout_ms() -> u64 {
    1000
}

impl VehicleConfig {
    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn lag_log_path(&self) -> Option<PathBuf> {
        self.lag_log.as_deref().map(expand_home)
    }
}

impl LoadConfig for VehicleConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(loop_interval_ms: u64) -> VehicleConfig {
        VehicleConfig {
            base: BaseConfig {
                vehicle_id: "mycar".to_string(),
            },
            log_level: "info".to_string(),
            remote_url: "http://localhost:8887".to_string(),
            loop_interval_ms,
            request_timeout_ms: default_request_timeout_ms(),
            lag_log: None,
        }
    }

    #[test]
    fn loop_interval_is_never_zero() {
        assert_eq!(config(0).loop_interval(), Duration::from_millis(1));
        assert_eq!(config(50).loop_interval(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn loop_interval_drives_a_ticker() {
        let mut ticker = tokio::time::interval(config(0).loop_interval());
        ticker.tick().await;
        ticker.tick().await;
    }
}
