use std::sync::Arc;
use std::time::Duration;

use remora_common::drive::{Command, DriveMode};
use remora_common::frame::Frame;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::rendezvous::RendezvousError;
use super::{PendingRequest, PendingResponse};
use crate::pilot::Pilot;
use crate::vehicle::Vehicle;

/// The worker that answers one vehicle's uploads.
pub struct DecisionLoop {
    vehicle: Arc<Vehicle>,
    publish_timeout: Duration,
}

impl DecisionLoop {
    pub fn new(vehicle: Arc<Vehicle>, publish_timeout: Duration) -> Self {
        Self {
            vehicle,
            publish_timeout,
        }
    }

    /// Runs until the vehicle's channels are closed.
    pub async fn run(self) {
        info!("Decision loop started for vehicle {}", self.vehicle.id());
        loop {
            let request = match self.vehicle.channels().request.recv(None).await {
                Ok(request) => request,
                Err(RendezvousError::Closed) => break,
                Err(RendezvousError::Timeout) => continue,
            };

            if request.deadline <= Instant::now() {
                debug!(
                    "Skipping request {} for vehicle {}, its upload already timed out",
                    request.seq,
                    self.vehicle.id()
                );
                continue;
            }

            let requested_by = request.deadline;
            let response = self.cycle(request).await;

            // nobody collects the answer once the upload has given up
            let deadline = (Instant::now() + self.publish_timeout).min(requested_by);
            match self
                .vehicle
                .channels()
                .response
                .send(response, Some(deadline))
                .await
            {
                Ok(()) => {}
                Err(RendezvousError::Timeout) => {
                    warn!(
                        "Vehicle {} did not collect response {} in time",
                        self.vehicle.id(),
                        response.seq
                    );
                    if let Some(withdrawn) = self.vehicle.channels().response.try_recv() {
                        debug!(
                            "Withdrew response {} for vehicle {}",
                            withdrawn.seq,
                            self.vehicle.id()
                        );
                    }
                }
                Err(RendezvousError::Closed) => break,
            }
        }
        info!("Decision loop stopped for vehicle {}", self.vehicle.id());
    }

    /// Decides, records and returns the answer for one request.
    pub async fn cycle(&self, request: PendingRequest) -> PendingResponse {
        let vehicle = &self.vehicle;

        let pilot = match vehicle.with_state(|state| state.pilot.clone()) {
            Ok(pilot) => pilot,
            Err(e) => return self.fail_safe(request.seq, e),
        };
        let (pilot_angle, pilot_throttle) = run_pilot(pilot, request.frame.clone()).await;

        let decided = vehicle.with_state(|state| {
            state.last_image = Some(request.frame.clone());
            state.last_telemetry = request.telemetry;
            state.pilot_angle = pilot_angle;
            state.pilot_throttle = pilot_throttle;
            state.cycles += 1;

            let (command, angle) = state.decide();
            if angle.clamped() {
                state.clamp_events += 1;
            }
            (command, angle.overflow, state.drive_mode, state.session.clone())
        });
        let (command, overflow, drive_mode, session) = match decided {
            Ok(decided) => decided,
            Err(e) => return self.fail_safe(request.seq, e),
        };

        if let Some(raw) = overflow {
            warn!(
                "Vehicle {} angle overflow {} clamped to {}",
                vehicle.id(),
                raw,
                command.angle
            );
        }

        if let Some(session) = session {
            let frame = request.frame.clone();
            let recorded = tokio::task::spawn_blocking(move || {
                session.put(&frame, command.angle, command.throttle, 0.0)
            })
            .await;
            match recorded {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Vehicle {} frame not recorded: {}", vehicle.id(), e),
                Err(e) => error!("Vehicle {} recorder task failed: {}", vehicle.id(), e),
            }
        }

        debug!(
            "Vehicle {} angle: {:+.2} throttle: {:+.2} drive_mode: {}",
            vehicle.id(),
            command.angle,
            command.throttle,
            drive_mode
        );

        PendingResponse {
            seq: request.seq,
            command,
            drive_mode,
        }
    }

    fn fail_safe(&self, seq: u64, e: anyhow::Error) -> PendingResponse {
        error!("Vehicle {} state unavailable: {}", self.vehicle.id(), e);
        PendingResponse {
            seq,
            command: Command::ZERO,
            drive_mode: DriveMode::User,
        }
    }
}

/// Runs the pilot off the async workers. Errors, panics and non-finite
/// outputs all become `(0, 0)`.
async fn run_pilot(pilot: Arc<dyn Pilot>, frame: Arc<Frame>) -> (f32, f32) {
    let name = pilot.name().to_string();
    match tokio::task::spawn_blocking(move || pilot.decide(&frame)).await {
        Ok(Ok((angle, throttle))) if angle.is_finite() && throttle.is_finite() => {
            (angle, throttle)
        }
        Ok(Ok((angle, throttle))) => {
            error!(
                "Pilot {} returned non-finite output ({}, {}), using zero command",
                name, angle, throttle
            );
            (0.0, 0.0)
        }
        Ok(Err(e)) => {
            error!("Pilot {} failed: {:#}, using zero command", name, e);
            (0.0, 0.0)
        }
        Err(e) => {
            error!("Pilot {} panicked: {}, using zero command", name, e);
            (0.0, 0.0)
        }
    }
}
