pub mod arbitration;
pub mod decision;
pub mod ingress;
pub mod rendezvous;

use std::sync::Arc;

use remora_common::drive::{Command, DriveMode};
use remora_common::frame::Frame;
use tokio::time::Instant;

use crate::vehicle::Telemetry;

/// An uploaded frame on its way to the decision loop.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub seq: u64,
    pub frame: Arc<Frame>,
    pub telemetry: Telemetry,
    /// When the uploading vehicle stops waiting for the answer.
    pub deadline: Instant,
}

/// The decision for the request with the same `seq`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingResponse {
    pub seq: u64,
    pub command: Command,
    pub drive_mode: DriveMode,
}
