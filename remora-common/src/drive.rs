use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::warn;

/// Selects where angle and throttle come from on each decision cycle.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DriveMode {
    /// Operator steers and throttles.
    #[default]
    User,
    /// Pilot steers, operator throttles.
    AutoAngle,
    /// Pilot steers and throttles.
    Auto,
}

impl DriveMode {
    /// Parses a mode name, falling back to [`DriveMode::User`] for anything unrecognised.
    pub fn parse(value: &str) -> Self {
        match DriveMode::from_str(value.trim()) {
            Ok(mode) => mode,
            Err(_) => {
                warn!("Unknown drive mode {:?}, falling back to user", value);
                DriveMode::User
            }
        }
    }
}

impl<'de> Deserialize<'de> for DriveMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(DriveMode::parse(&value))
    }
}

/// Steering and throttle pair, both nominally in [-1.0, 1.0].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub angle: f32,
    pub throttle: f32,
}

impl Command {
    pub const ZERO: Command = Command {
        angle: 0.0,
        throttle: 0.0,
    };

    pub fn new(angle: f32, throttle: f32) -> Self {
        Self { angle, throttle }
    }
}
