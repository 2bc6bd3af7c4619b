//! The telemetry sample exchanged between producer and consumers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Probabilities for the three fixed zones of a multi-zone deployment.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneProbabilities {
    pub left: f32,
    pub center: f32,
    pub right: f32,
}

/// One frame's worth of classification results.
///
/// Samples are immutable after construction: the producer builds a fresh one
/// each cycle and consumers only read. `zone_probabilities` is present on
/// multi-zone deployments and omitted from the wire otherwise; both shapes
/// travel on the same channel without a version flag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_probabilities: Option<ZoneProbabilities>,
    /// Probability driving single-zone deployments; equals the center zone's
    /// value when zones are present.
    pub primary_probability: f32,
    /// Compressed image for display consumers. Opaque to the decision logic.
    #[serde(with = "frame_payload_b64")]
    pub frame_payload: Vec<u8>,
    /// Producer-measured capture rate. Advisory, never influences control.
    pub capture_fps: f32,
    /// Wall-clock milliseconds stamped at publish time, for staleness
    /// diagnostics only.
    pub emitted_at_ms: i64,
}

#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    #[error("{field} probability {value} outside [0, 1]")]
    OutOfRange { field: &'static str, value: f32 },
    #[error("negative capture fps {0}")]
    NegativeFps(f32),
}

impl TelemetrySample {
    /// Check every probability lies in `[0, 1]` (non-finite values fail the
    /// range check as well). A sample that fails here is a protocol
    /// violation and must be skipped, never acted on.
    pub fn validate(&self) -> Result<(), SampleError> {
        check_probability("primary", self.primary_probability)?;
        if let Some(zones) = &self.zone_probabilities {
            check_probability("left", zones.left)?;
            check_probability("center", zones.center)?;
            check_probability("right", zones.right)?;
        }
        if self.capture_fps < 0.0 || !self.capture_fps.is_finite() {
            return Err(SampleError::NegativeFps(self.capture_fps));
        }
        Ok(())
    }
}

fn check_probability(field: &'static str, value: f32) -> Result<(), SampleError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SampleError::OutOfRange { field, value })
    }
}

mod frame_payload_b64 {
    //! Base64 representation of the frame payload inside the JSON record.

    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(Error::custom)
    }
}
