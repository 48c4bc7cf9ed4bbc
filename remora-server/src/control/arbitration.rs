use remora_common::drive::{Command, DriveMode};

pub const ANGLE_LIMIT: f32 = 1.0;

/// Picks the angle and throttle sources for `mode`.
pub fn arbitrate(mode: DriveMode, user: Command, pilot: Command) -> Command {
    match mode {
        DriveMode::User => user,
        DriveMode::AutoAngle => Command::new(pilot.angle, user.throttle),
        DriveMode::Auto => pilot,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamped {
    pub value: f32,
    /// The angle before clamping, when clamping changed it.
    pub overflow: Option<f32>,
}

impl Clamped {
    pub fn clamped(&self) -> bool {
        self.overflow.is_some()
    }
}

/// Multiplies `angle` by the steering gain and clamps it to [-1.0, 1.0].
/// A NaN result is forced to 0.0.
pub fn apply_gain(angle: f32, multiplier: f32) -> Clamped {
    let raw = angle * multiplier;
    let value = if raw.is_nan() {
        0.0
    } else {
        raw.clamp(-ANGLE_LIMIT, ANGLE_LIMIT)
    };
    Clamped {
        value,
        overflow: (raw.is_nan() || value != raw).then_some(raw),
    }
}
