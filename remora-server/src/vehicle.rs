use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use remora_common::drive::{Command, DriveMode};
use remora_common::frame::Frame;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::control::arbitration::{apply_gain, arbitrate, Clamped};
use crate::control::rendezvous::{ChannelPair, RendezvousError};
use crate::control::{PendingRequest, PendingResponse};
use crate::pilot::Pilot;
use crate::session::SessionHandle;

/// What the vehicle reported about itself on its last upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Telemetry {
    pub angle: f32,
    pub throttle: f32,
    pub milliseconds: f32,
}

pub struct VehicleState {
    pub user_angle: f32,
    pub user_throttle: f32,
    pub pilot_angle: f32,
    pub pilot_throttle: f32,
    pub drive_mode: DriveMode,
    pub angle_multiplier: f32,
    pub pilot: Arc<dyn Pilot>,
    pub last_image: Option<Arc<Frame>>,
    pub last_telemetry: Telemetry,
    /// Present exactly while recording.
    pub session: Option<Arc<dyn SessionHandle>>,
    pub clamp_events: u64,
    pub cycles: u64,
}

impl fmt::Debug for VehicleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VehicleState")
            .field("user_angle", &self.user_angle)
            .field("user_throttle", &self.user_throttle)
            .field("pilot_angle", &self.pilot_angle)
            .field("pilot_throttle", &self.pilot_throttle)
            .field("drive_mode", &self.drive_mode)
            .field("angle_multiplier", &self.angle_multiplier)
            .field("pilot", &self.pilot.name())
            .field("session", &self.session.as_ref().map(|s| s.name().to_string()))
            .field("clamp_events", &self.clamp_events)
            .field("cycles", &self.cycles)
            // Skip the frame, it is large
            .finish()
    }
}

impl VehicleState {
    pub fn new(pilot: Arc<dyn Pilot>) -> Self {
        Self {
            user_angle: 0.0,
            user_throttle: 0.0,
            pilot_angle: 0.0,
            pilot_throttle: 0.0,
            drive_mode: DriveMode::User,
            angle_multiplier: 1.0,
            pilot,
            last_image: None,
            last_telemetry: Telemetry::default(),
            session: None,
            clamp_events: 0,
            cycles: 0,
        }
    }

    /// Arbitrates the current inputs and applies the steering gain.
    ///
    /// Returns the command to send and the clamp outcome for the angle.
    pub fn decide(&self) -> (Command, Clamped) {
        let command = arbitrate(
            self.drive_mode,
            Command::new(self.user_angle, self.user_throttle),
            Command::new(self.pilot_angle, self.pilot_throttle),
        );
        let angle = apply_gain(command.angle, self.angle_multiplier);
        (Command::new(angle.value, command.throttle), angle)
    }
}

/// Point-in-time view for operator surfaces. Holds no frame and no handles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleStatus {
    pub id: String,
    pub drive_mode: DriveMode,
    pub recording: bool,
    pub session: Option<String>,
    pub user_angle: f32,
    pub user_throttle: f32,
    pub pilot_angle: f32,
    pub pilot_throttle: f32,
    pub angle_multiplier: f32,
    pub pilot: String,
    pub last_telemetry: Telemetry,
    pub has_frame: bool,
    pub clamp_events: u64,
    pub cycles: u64,
}

pub struct Vehicle {
    id: String,
    state: Mutex<VehicleState>,
    channels: ChannelPair,
    // serializes upload cycles; holds the last sequence number issued
    cycle: tokio::sync::Mutex<u64>,
}

impl fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vehicle")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl Vehicle {
    pub fn new(id: impl Into<String>, pilot: Arc<dyn Pilot>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(VehicleState::new(pilot)),
            channels: ChannelPair::new(),
            cycle: tokio::sync::Mutex::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channels(&self) -> &ChannelPair {
        &self.channels
    }

    /// Runs `f` with exclusive access to the whole state.
    ///
    /// Keep `f` short: never block or await inside it.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut VehicleState) -> R) -> Result<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        Ok(f(&mut state))
    }

    pub fn status(&self) -> Result<VehicleStatus> {
        self.with_state(|state| VehicleStatus {
            id: self.id.clone(),
            drive_mode: state.drive_mode,
            recording: state.session.is_some(),
            session: state.session.as_ref().map(|s| s.name().to_string()),
            user_angle: state.user_angle,
            user_throttle: state.user_throttle,
            pilot_angle: state.pilot_angle,
            pilot_throttle: state.pilot_throttle,
            angle_multiplier: state.angle_multiplier,
            pilot: state.pilot.name().to_string(),
            last_telemetry: state.last_telemetry,
            has_frame: state.last_image.is_some(),
            clamp_events: state.clamp_events,
            cycles: state.cycles,
        })
    }

    pub fn drive_mode(&self) -> DriveMode {
        self.with_state(|state| state.drive_mode)
            .unwrap_or_default()
    }

    pub fn last_image(&self) -> Result<Option<Arc<Frame>>> {
        self.with_state(|state| state.last_image.clone())
    }

    pub fn set_pilot(&self, pilot: Arc<dyn Pilot>) -> Result<()> {
        self.with_state(|state| state.pilot = pilot)
    }

    /// One upload/response cycle: hands `frame` to this vehicle's decision
    /// loop and waits for the matching answer, all within `budget`.
    ///
    /// Cycles for the same vehicle never overlap. Answers left over from an
    /// earlier cycle that timed out are discarded.
    pub async fn exchange(
        &self,
        frame: Arc<Frame>,
        telemetry: Telemetry,
        budget: Duration,
    ) -> Result<PendingResponse, RendezvousError> {
        let deadline = Instant::now() + budget;
        let mut last_seq = tokio::time::timeout_at(deadline, self.cycle.lock())
            .await
            .map_err(|_| RendezvousError::Timeout)?;
        *last_seq += 1;
        let seq = *last_seq;

        // no cycle is in flight, so anything still in the response slot is stale
        while let Some(stale) = self.channels.response.try_recv() {
            debug!(
                "Dropping stale response {} for vehicle {} before cycle {}",
                stale.seq, self.id, seq
            );
        }

        self.channels
            .request
            .send(
                PendingRequest {
                    seq,
                    frame,
                    telemetry,
                    deadline,
                },
                Some(deadline),
            )
            .await?;

        loop {
            let response = self.channels.response.recv(Some(deadline)).await?;
            if response.seq == seq {
                return Ok(response);
            }
            debug!(
                "Discarding stale response {} for vehicle {} (waiting for {})",
                response.seq, self.id, seq
            );
        }
    }
}
