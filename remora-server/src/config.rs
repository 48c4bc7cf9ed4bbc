use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use remora_common::config::{expand_home, BaseConfig, LoadConfig};

use serde::Deserialize;

pub static CONFIG: LazyLock<ServerConfig> =
    LazyLock::new(|| ServerConfig::load_config("server").expect("Failed to load configuration"));

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub base: BaseConfig,
    pub log_level: String,
    pub web: WebConfig,
    pub control: ControlConfig,
    pub sessions: SessionsConfig,
    pub video: VideoConfig,
    #[serde(default)]
    pub pilots: Vec<PilotConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_static_dir() -> String {
    "remora-server/static".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Budget for one whole upload/response cycle, seen from the vehicle.
    pub response_timeout_ms: u64,
    /// How long the decision loop waits for the vehicle to collect its answer.
    pub publish_timeout_ms: u64,
}

impl ControlConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            publish_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    pub path: String,
}

impl SessionsConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    pub interval_ms: u64,
}

impl VideoConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// A pilot that always answers with the same command.
#[derive(Debug, Clone, Deserialize)]
pub struct PilotConfig {
    pub name: String,
    pub angle: f32,
    pub throttle: f32,
}

impl LoadConfig for ServerConfig {}
