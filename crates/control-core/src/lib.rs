//! Domain model for the vision-to-actuation pipeline: the telemetry sample,
//! zone geometry, and the decision machine that turns zone probabilities
//! into steering and throttle.
//!
//! Everything in this crate is pure and synchronous so the decision logic
//! can be unit tested without a transport or any hardware attached.

pub use decision::{
    DEFAULT_HALT_ABOVE, DEFAULT_RESUME_BELOW, DEFAULT_TARGET_THRESHOLD, DriveCommand, DrivePolicy,
    HysteresisGate,
};
pub use sample::{SampleError, TelemetrySample, ZoneProbabilities};
pub use zones::{GeometryError, ImageRegion, Zone, ZoneMode, ZoneState, crop_zone, zone_offset};

pub mod decision;
pub mod sample;
pub mod zones;
