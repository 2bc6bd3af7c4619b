//! Zone geometry and discretized zone state.
//!
//! Multi-zone deployments slice each frame into three square crops (side
//! equal to the frame height): one flush left, one centered, one flush
//! right. On the reference 320x224 source this lands the crops at x = 0, 48
//! and 96. Single-zone deployments classify the whole frame.

use thiserror::Error;

use crate::sample::ZoneProbabilities;

/// Zone identifiers, fixed per deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zone {
    Left,
    Center,
    Right,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Left, Zone::Center, Zone::Right];

    pub fn label(self) -> &'static str {
        match self {
            Zone::Left => "left",
            Zone::Center => "center",
            Zone::Right => "right",
        }
    }
}

/// Whether a deployment classifies one region or three.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneMode {
    Single,
    Triple,
}

/// A packed-RGB sub-region handed to the inference collaborator.
pub struct ImageRegion {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("frame {width}x{height} is narrower than its square crop side")]
    FrameTooNarrow { width: u32, height: u32 },
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferMismatch { actual: usize, expected: usize },
}

/// Horizontal pixel offset of `zone`'s square crop within a frame.
pub fn zone_offset(zone: Zone, frame_width: u32, frame_height: u32) -> Result<u32, GeometryError> {
    if frame_width < frame_height {
        return Err(GeometryError::FrameTooNarrow {
            width: frame_width,
            height: frame_height,
        });
    }
    let span = frame_width - frame_height;
    Ok(match zone {
        Zone::Left => 0,
        Zone::Center => span / 2,
        Zone::Right => span,
    })
}

/// Copy `zone`'s square crop out of a packed RGB frame buffer.
pub fn crop_zone(
    pixels: &[u8],
    frame_width: u32,
    frame_height: u32,
    zone: Zone,
) -> Result<ImageRegion, GeometryError> {
    let expected = frame_width as usize * frame_height as usize * 3;
    if pixels.len() != expected {
        return Err(GeometryError::BufferMismatch {
            actual: pixels.len(),
            expected,
        });
    }
    let offset = zone_offset(zone, frame_width, frame_height)? as usize;
    let side = frame_height as usize;
    let stride = frame_width as usize * 3;

    let mut data = Vec::with_capacity(side * side * 3);
    for row in 0..side {
        let start = row * stride + offset * 3;
        data.extend_from_slice(&pixels[start..start + side * 3]);
    }
    Ok(ImageRegion {
        data,
        width: frame_height,
        height: frame_height,
    })
}

/// Per-zone activation derived from one sample. Recomputed every iteration;
/// carries no identity beyond the current sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneState {
    pub left: bool,
    pub center: bool,
    pub right: bool,
}

impl ZoneState {
    /// Threshold each zone with strict `>`: a probability exactly at the
    /// threshold resolves to "not active".
    pub fn from_probabilities(probs: &ZoneProbabilities, threshold: f32) -> Self {
        Self {
            left: probs.left > threshold,
            center: probs.center > threshold,
            right: probs.right > threshold,
        }
    }
}
