use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_WIDTH: u32 = 160;
pub const DEFAULT_HEIGHT: u32 = 120;
/// Largest pixel buffer accepted: a 4096x4096 RGB image.
pub const MAX_PIXEL_BYTES: usize = 4096 * 4096 * 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero width or height")]
    Empty,
    #[error("unsupported channel count {0}, expected 1 or 3")]
    Channels(u8),
    #[error("expected {expected} pixel bytes for {width}x{height}x{channels}, got {actual}")]
    Size {
        width: u32,
        height: u32,
        channels: u8,
        expected: usize,
        actual: usize,
    },
    #[error("{width}x{height}x{channels} exceeds {max} pixel bytes")]
    TooLarge {
        width: u32,
        height: u32,
        channels: u8,
        max: usize,
    },
    #[error("malformed PNM data: {0}")]
    Pnm(&'static str),
}

/// A camera frame as a raw, row-major pixel array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_channels")]
    pub channels: u8,
    pub pixels: Vec<u8>,
}

fn default_channels() -> u8 {
    1
}

impl Default for Frame {
    fn default() -> Self {
        Self::blank(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u8, pixels: Vec<u8>) -> Result<Self, FrameError> {
        let frame = Self {
            width,
            height,
            channels,
            pixels,
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Mid-grey single channel frame.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 1,
            pixels: vec![128; width as usize * height as usize],
        }
    }

    /// Pixel bytes the dimensions call for, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels as usize)
    }

    /// Checks the dimensions against the pixel buffer. Deserialized frames are
    /// unchecked until this is called.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty);
        }
        if self.channels != 1 && self.channels != 3 {
            return Err(FrameError::Channels(self.channels));
        }
        let expected = match self.expected_len() {
            Some(expected) if expected <= MAX_PIXEL_BYTES => expected,
            _ => {
                return Err(FrameError::TooLarge {
                    width: self.width,
                    height: self.height,
                    channels: self.channels,
                    max: MAX_PIXEL_BYTES,
                })
            }
        };
        if self.pixels.len() != expected {
            return Err(FrameError::Size {
                width: self.width,
                height: self.height,
                channels: self.channels,
                expected,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    /// Binary PNM: P5 for greyscale, P6 for RGB.
    pub fn to_pnm(&self) -> Vec<u8> {
        let magic = if self.channels == 3 { "P6" } else { "P5" };
        let header = format!("{}\n{} {}\n255\n", magic, self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.pixels.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.pixels);
        out
    }

    pub fn from_pnm(data: &[u8]) -> Result<Self, FrameError> {
        // magic, width, height, maxval, then exactly one whitespace byte
        let mut fields = Vec::with_capacity(4);
        let mut pos = 0;
        while fields.len() < 4 {
            while pos < data.len() && data[pos].is_ascii_whitespace() {
                pos += 1;
            }
            let start = pos;
            while pos < data.len() && !data[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if start == pos {
                return Err(FrameError::Pnm("truncated header"));
            }
            let field =
                std::str::from_utf8(&data[start..pos]).map_err(|_| FrameError::Pnm("header"))?;
            fields.push(field);
        }
        if pos >= data.len() {
            return Err(FrameError::Pnm("missing pixel data"));
        }
        let pixels = data[pos + 1..].to_vec();

        let channels = match fields[0] {
            "P5" => 1,
            "P6" => 3,
            _ => return Err(FrameError::Pnm("unsupported magic")),
        };
        let width = fields[1].parse().map_err(|_| FrameError::Pnm("width"))?;
        let height = fields[2].parse().map_err(|_| FrameError::Pnm("height"))?;
        if fields[3] != "255" {
            return Err(FrameError::Pnm("only 8-bit maxval is supported"));
        }
        Frame::new(width, height, channels, pixels)
    }
}
