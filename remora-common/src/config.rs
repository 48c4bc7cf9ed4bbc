use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct BaseConfig {
    pub vehicle_id: String,
}

pub trait LoadConfig {
    fn load_config(service_name: &str) -> Result<Self, ConfigError>
    where
        Self: Sized + serde::de::DeserializeOwned,
    {
        // Try development path first
        let dev_path = PathBuf::from("deploy/config/development");
        let prod_path = PathBuf::from("/etc/remora");

        let config_dir = if dev_path.join(format!("{}.toml", service_name)).exists() {
            dev_path
        } else if prod_path.join(format!("{}.toml", service_name)).exists() {
            prod_path
        } else {
            return Err(ConfigError::NotFound(format!(
                "Config file not found in {:?}",
                prod_path.join(format!("{}.toml", service_name))
            )));
        };

        let config = Config::builder()
            // Base config first (if it exists)
            .add_source(File::from(config_dir.join("base.toml")).required(false))
            // Service-specific config (required)
            .add_source(File::from(
                config_dir.join(format!("{}.toml", service_name)),
            ))
            // REMORA_WEB__PORT=9000 overrides web.port
            .add_source(Environment::with_prefix("REMORA").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

/// Expands a leading `~` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
