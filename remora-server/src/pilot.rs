use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use remora_common::frame::Frame;
use tracing::warn;

use crate::config::PilotConfig;

pub const NO_OP_PILOT: &str = "none";

/// An autopilot that turns a camera frame into `(angle, throttle)`.
///
/// Implementations run on the blocking thread pool and must return in bounded
/// time. Errors and panics are caught by the decision loop and replaced by a
/// zero command.
pub trait Pilot: Send + Sync {
    fn name(&self) -> &str;
    fn decide(&self, frame: &Frame) -> Result<(f32, f32)>;
}

impl fmt::Debug for dyn Pilot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pilot").field("name", &self.name()).finish()
    }
}

/// Does nothing: always `(0, 0)`.
#[derive(Debug, Default)]
pub struct NoOpPilot;

impl Pilot for NoOpPilot {
    fn name(&self) -> &str {
        NO_OP_PILOT
    }

    fn decide(&self, _frame: &Frame) -> Result<(f32, f32)> {
        Ok((0.0, 0.0))
    }
}

/// Always answers with the same command. Handy on the bench.
#[derive(Debug, Clone)]
pub struct FixedPilot {
    name: String,
    angle: f32,
    throttle: f32,
}

impl FixedPilot {
    pub fn new(name: impl Into<String>, angle: f32, throttle: f32) -> Self {
        Self {
            name: name.into(),
            angle,
            throttle,
        }
    }
}

impl From<&PilotConfig> for FixedPilot {
    fn from(config: &PilotConfig) -> Self {
        Self::new(config.name.clone(), config.angle, config.throttle)
    }
}

impl Pilot for FixedPilot {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, _frame: &Frame) -> Result<(f32, f32)> {
        Ok((self.angle, self.throttle))
    }
}

/// Pilots selectable by name. Always holds [`NoOpPilot`].
pub struct PilotRegistry {
    pilots: HashMap<String, Arc<dyn Pilot>>,
}

impl Default for PilotRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PilotRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            pilots: HashMap::new(),
        };
        registry.register(Arc::new(NoOpPilot));
        registry
    }

    pub fn from_config(pilots: &[PilotConfig]) -> Self {
        let mut registry = Self::new();
        for config in pilots {
            if config.name == NO_OP_PILOT {
                warn!("Pilot name {:?} is reserved, skipping configured pilot", NO_OP_PILOT);
                continue;
            }
            registry.register(Arc::new(FixedPilot::from(config)));
        }
        registry
    }

    /// Adds or replaces a pilot under its own name.
    pub fn register(&mut self, pilot: Arc<dyn Pilot>) {
        self.pilots.insert(pilot.name().to_string(), pilot);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Pilot>> {
        self.pilots
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown pilot {:?}", name))
    }

    pub fn default_pilot(&self) -> Arc<dyn Pilot> {
        self.pilots
            .get(NO_OP_PILOT)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoOpPilot))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pilots.keys().cloned().collect();
        names.sort();
        names
    }
}
