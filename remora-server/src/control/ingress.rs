//! Operator commands that write straight into a vehicle's state.
//!
//! There is no queue: whatever was written last before the decision loop's
//! next cycle wins.

use anyhow::Result;
use remora_common::drive::DriveMode;
use remora_common::wire::optional;
use serde::Deserialize;
use tracing::{info, warn};

use crate::session::SessionStore;
use crate::vehicle::{Vehicle, VehicleStatus};

/// One message from the drive page.
///
/// Numbers may arrive as JSON numbers or strings. An empty or missing angle
/// or throttle means 0. Missing `drive_mode`, `angle_multiplier` or
/// `recording` leave the current value alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveControl {
    #[serde(default, deserialize_with = "optional::deserialize")]
    pub angle: Option<f32>,
    #[serde(default, deserialize_with = "optional::deserialize")]
    pub throttle: Option<f32>,
    #[serde(default)]
    pub drive_mode: Option<String>,
    #[serde(default, deserialize_with = "optional::deserialize")]
    pub angle_multiplier: Option<f32>,
    #[serde(default)]
    pub recording: Option<bool>,
}

impl LiveControl {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Applies `message` to `vehicle` in one critical section and returns the
/// resulting status.
///
/// Sessions are opened before and closed after the critical section, so the
/// state lock is never held across session I/O. A session switched off is
/// closed before this returns.
pub fn apply(
    vehicle: &Vehicle,
    message: &LiveControl,
    sessions: &dyn SessionStore,
) -> Result<VehicleStatus> {
    let opened = match message.recording {
        Some(true) if !vehicle.with_state(|state| state.session.is_some())? => {
            Some(sessions.open()?)
        }
        _ => None,
    };

    let to_close = vehicle.with_state(|state| {
        let to_close = match message.recording {
            Some(true) => match (state.session.is_some(), opened) {
                (false, Some(session)) => {
                    info!(
                        "Vehicle {} recording to session {}",
                        vehicle.id(),
                        session.name()
                    );
                    state.session = Some(session);
                    None
                }
                // another message started recording first
                (true, spare) => spare,
                (false, None) => None,
            },
            Some(false) => state.session.take(),
            None => None,
        };

        if let Some(mode) = &message.drive_mode {
            state.drive_mode = DriveMode::parse(mode);
        }

        if let Some(multiplier) = message.angle_multiplier {
            if multiplier.is_finite() {
                state.angle_multiplier = multiplier;
            } else {
                warn!(
                    "Vehicle {} ignoring angle multiplier {}",
                    vehicle.id(),
                    multiplier
                );
            }
        }

        state.user_angle = finite_or_zero(vehicle, "angle", message.angle);
        state.user_throttle = finite_or_zero(vehicle, "throttle", message.throttle);
        to_close
    })?;

    if let Some(session) = to_close {
        session.close();
        info!("Vehicle {} closed session {}", vehicle.id(), session.name());
    }

    vehicle.status()
}

/// Missing values are 0. So are NaN and infinities, which never reach the vehicle.
fn finite_or_zero(vehicle: &Vehicle, field: &str, value: Option<f32>) -> f32 {
    match value {
        Some(value) if value.is_finite() => value,
        Some(value) => {
            warn!("Vehicle {} ignoring {} {}", vehicle.id(), field, value);
            0.0
        }
        None => 0.0,
    }
}
