//! Encoding of the vehicle upload/response cycle.
//!
//! Numbers travel as strings (`"0.5"`), the way the vehicles have always sent
//! them. Decoders also accept plain JSON numbers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drive::{Command, DriveMode};
use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("field {field} is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// One upload from the vehicle: the current camera frame and what it is doing now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub image: Frame,
    #[serde(default, with = "lenient")]
    pub angle: f32,
    #[serde(default, with = "lenient")]
    pub throttle: f32,
    #[serde(default, with = "lenient")]
    pub milliseconds: f32,
}

impl UploadRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// The server's answer to one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub angle: String,
    pub throttle: String,
    pub drive_mode: String,
}

impl WireResponse {
    pub fn encode(command: Command, mode: DriveMode) -> Self {
        Self {
            angle: format_float(command.angle),
            throttle: format_float(command.throttle),
            drive_mode: mode.to_string(),
        }
    }

    pub fn zero(mode: DriveMode) -> Self {
        Self::encode(Command::ZERO, mode)
    }

    pub fn decode(&self) -> Result<(Command, DriveMode), WireError> {
        let angle = parse_float("angle", &self.angle)?;
        let throttle = parse_float("throttle", &self.throttle)?;
        Ok((Command::new(angle, throttle), DriveMode::parse(&self.drive_mode)))
    }
}

/// Shortest representation that parses back to the same value, always with a
/// decimal point (`0.0`, not `0`).
pub fn format_float(value: f32) -> String {
    format!("{:?}", value)
}

fn parse_float(field: &'static str, value: &str) -> Result<f32, WireError> {
    value.trim().parse().map_err(|_| WireError::NotANumber {
        field,
        value: value.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Number(f64),
    Text(String),
}

impl Loose {
    /// `None` for blank text. NaN, infinities and values beyond `f32` range
    /// are errors.
    fn into_f32<E: serde::de::Error>(self) -> Result<Option<f32>, E> {
        let value = match self {
            Loose::Number(n) => n as f32,
            Loose::Text(s) if s.trim().is_empty() => return Ok(None),
            Loose::Text(s) => s
                .trim()
                .parse::<f32>()
                .map_err(|_| E::custom(format!("not a number: {:?}", s)))?,
        };
        if !value.is_finite() {
            return Err(E::custom(format!("not a finite number: {}", value)));
        }
        Ok(Some(value))
    }
}

/// Float fields written as strings, read from either strings or numbers.
pub mod lenient {
    use super::{format_float, Loose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &f32, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_float(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f32, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Loose>::deserialize(deserializer)? {
            Some(loose) => Ok(loose.into_f32()?.unwrap_or(0.0)),
            None => Ok(0.0),
        }
    }
}

/// Like [`lenient`] but keeps "no value" (`""`, `null`) distinct from zero.
pub mod optional {
    use super::Loose;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Loose>::deserialize(deserializer)? {
            Some(loose) => loose.into_f32(),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_round_trip_preserves_values() {
        for (angle, throttle) in [(0.0, 0.0), (0.5, 0.3), (-1.0, 1.0), (0.123_456_79, -0.7)] {
            for mode in [DriveMode::User, DriveMode::AutoAngle, DriveMode::Auto] {
                let wire = WireResponse::encode(Command::new(angle, throttle), mode);
                let json = serde_json::to_string(&wire).unwrap();
                let back: WireResponse = serde_json::from_str(&json).unwrap();
                assert_eq!(back.drive_mode, mode.to_string());
                let (command, decoded_mode) = back.decode().unwrap();
                assert_eq!(command, Command::new(angle, throttle));
                assert_eq!(decoded_mode, mode);
            }
        }
    }

    #[test]
    fn zero_encodes_with_decimal_point() {
        let wire = WireResponse::zero(DriveMode::User);
        assert_eq!(wire.angle, "0.0");
        assert_eq!(wire.throttle, "0.0");
        assert_eq!(wire.drive_mode, "user");
    }

    #[test]
    fn decode_rejects_non_numeric() {
        let wire = WireResponse {
            angle: "left".to_string(),
            throttle: "0.0".to_string(),
            drive_mode: "user".to_string(),
        };
        assert!(matches!(
            wire.decode(),
            Err(WireError::NotANumber { field: "angle", .. })
        ));
    }

    #[test]
    fn upload_accepts_strings_and_numbers() {
        let body = br#"{
            "image": {"width": 2, "height": 1, "pixels": [0, 255]},
            "angle": "0.25",
            "throttle": 0.5
        }"#;
        let upload = UploadRequest::from_slice(body).unwrap();
        assert_eq!(upload.angle, 0.25);
        assert_eq!(upload.throttle, 0.5);
        assert_eq!(upload.milliseconds, 0.0);
        assert!(upload.image.validate().is_ok());
    }

    #[test]
    fn upload_serializes_numbers_as_strings() {
        let upload = UploadRequest {
            image: Frame::blank(1, 1),
            angle: 0.5,
            throttle: 0.0,
            milliseconds: 20.0,
        };
        let value = serde_json::to_value(&upload).unwrap();
        assert_eq!(value["angle"], "0.5");
        assert_eq!(value["throttle"], "0.0");
        assert_eq!(value["milliseconds"], "20.0");
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        for angle in [r#""NaN""#, r#""inf""#, r#""-infinity""#, "1e39"] {
            let body = format!(
                r#"{{"image": {{"width": 1, "height": 1, "pixels": [0]}}, "angle": {}}}"#,
                angle
            );
            assert!(
                UploadRequest::from_slice(body.as_bytes()).is_err(),
                "accepted angle {}",
                angle
            );
        }
    }

    #[test]
    fn upload_rejects_malformed_json() {
        assert!(UploadRequest::from_slice(b"{\"image\": 3}").is_err());
        assert!(UploadRequest::from_slice(b"not json").is_err());
        assert!(UploadRequest::from_slice(
            br#"{"image": {"width": 1, "height": 1, "pixels": [0]}, "angle": "fast"}"#
        )
        .is_err());
    }
}
