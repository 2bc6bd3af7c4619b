//! Probability-to-actuation decision logic.
//!
//! The three-zone table is a pure function of the current zone state: no
//! memory, no filtering, the same state always yields the same command. The
//! single-zone variant deliberately relaxes that with an asymmetric
//! dead-band so a noisy probability hovering near one threshold cannot
//! chatter the throttle; inside the band it emits no command at all and the
//! previously applied command simply stays in force.

use crate::zones::ZoneState;

/// Default activation threshold for multi-zone deployments.
pub const DEFAULT_TARGET_THRESHOLD: f32 = 0.60;
/// Defaults for the single-zone dead-band. Historical deployments disagreed
/// on these values, so they are configuration; these are the most recent.
pub const DEFAULT_HALT_ABOVE: f32 = 0.70;
pub const DEFAULT_RESUME_BELOW: f32 = 0.40;

const DEFAULT_FORWARD_SPEED: f32 = 0.14;
const DEFAULT_TURN_SPEED: f32 = 0.14;
const DEFAULT_SOFT_STEER: f32 = 0.3;
const DEFAULT_HARD_STEER: f32 = 0.6;
const DEFAULT_CRUISE_SPEED: f32 = 0.13;

/// One actuation command. Steering is negative toward the left, zero
/// centered; throttle is non-negative. Superseded by the next command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriveCommand {
    pub steering: f32,
    pub throttle: f32,
}

impl DriveCommand {
    /// Centered steering, zero throttle. Issued on lost target and on every
    /// shutdown path.
    pub const fn neutral() -> Self {
        Self {
            steering: 0.0,
            throttle: 0.0,
        }
    }

    /// Constrain to the deployment's actuator bounds.
    pub fn clamped(self, max_throttle: f32) -> Self {
        Self {
            steering: self.steering.clamp(-1.0, 1.0),
            throttle: self.throttle.clamp(0.0, max_throttle),
        }
    }
}

/// Speeds and steering magnitudes for the three-zone table.
#[derive(Clone, Debug)]
pub struct DrivePolicy {
    pub forward_speed: f32,
    pub turn_speed: f32,
    pub soft_steer: f32,
    pub hard_steer: f32,
}

impl Default for DrivePolicy {
    fn default() -> Self {
        Self {
            forward_speed: DEFAULT_FORWARD_SPEED,
            turn_speed: DEFAULT_TURN_SPEED,
            soft_steer: DEFAULT_SOFT_STEER,
            hard_steer: DEFAULT_HARD_STEER,
        }
    }
}

impl DrivePolicy {
    /// Map a zone state to a command. Rules are ordered and mutually
    /// exclusive; the first match wins.
    pub fn decide(&self, state: ZoneState) -> DriveCommand {
        let ZoneState {
            left,
            center,
            right,
        } = state;

        if (left && center && right) || (center && !left && !right) {
            // Target filling the frame or perfectly aligned: straight ahead.
            DriveCommand {
                steering: 0.0,
                throttle: self.forward_speed,
            }
        } else if center && left {
            DriveCommand {
                steering: -self.soft_steer,
                throttle: self.turn_speed,
            }
        } else if center && right {
            DriveCommand {
                steering: self.soft_steer,
                throttle: self.turn_speed,
            }
        } else if left {
            DriveCommand {
                steering: -self.hard_steer,
                throttle: self.turn_speed,
            }
        } else if right {
            DriveCommand {
                steering: self.hard_steer,
                throttle: self.turn_speed,
            }
        } else {
            // Target not visible in any zone.
            DriveCommand::neutral()
        }
    }
}

/// Single-zone hysteresis gate.
///
/// `evaluate` is itself stateless; the hold behavior comes from the caller
/// applying no command when `None` is returned.
#[derive(Clone, Debug)]
pub struct HysteresisGate {
    pub halt_above: f32,
    pub resume_below: f32,
    pub cruise_speed: f32,
}

impl Default for HysteresisGate {
    fn default() -> Self {
        Self {
            halt_above: DEFAULT_HALT_ABOVE,
            resume_below: DEFAULT_RESUME_BELOW,
            cruise_speed: DEFAULT_CRUISE_SPEED,
        }
    }
}

impl HysteresisGate {
    /// Above the high threshold: halt. Below the low threshold: cruise.
    /// Inside the dead-band: no change.
    pub fn evaluate(&self, probability: f32) -> Option<DriveCommand> {
        if probability > self.halt_above {
            Some(DriveCommand::neutral())
        } else if probability < self.resume_below {
            Some(DriveCommand {
                steering: 0.0,
                throttle: self.cruise_speed,
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(left: bool, center: bool, right: bool) -> ZoneState {
        ZoneState {
            left,
            center,
            right,
        }
    }

    #[test]
    fn all_eight_zone_states_follow_the_table() {
        let policy = DrivePolicy::default();
        let forward = DriveCommand {
            steering: 0.0,
            throttle: policy.forward_speed,
        };
        let soft_left = DriveCommand {
            steering: -policy.soft_steer,
            throttle: policy.turn_speed,
        };
        let soft_right = DriveCommand {
            steering: policy.soft_steer,
            throttle: policy.turn_speed,
        };
        let hard_left = DriveCommand {
            steering: -policy.hard_steer,
            throttle: policy.turn_speed,
        };
        let hard_right = DriveCommand {
            steering: policy.hard_steer,
            throttle: policy.turn_speed,
        };

        let expectations = [
            (state(false, false, false), DriveCommand::neutral()),
            (state(false, true, false), forward),
            (state(true, true, true), forward),
            (state(true, true, false), soft_left),
            (state(false, true, true), soft_right),
            (state(true, false, false), hard_left),
            (state(false, false, true), hard_right),
            // Both sides without center reads as a split target; the first
            // matching side rule wins.
            (state(true, false, true), hard_left),
        ];
        for (zone_state, expected) in expectations {
            assert_eq!(policy.decide(zone_state), expected, "state {zone_state:?}");
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        let policy = DrivePolicy::default();
        let s = state(true, true, false);
        let first = policy.decide(s);
        for _ in 0..100 {
            assert_eq!(policy.decide(s), first);
        }
    }

    #[test]
    fn hysteresis_commands_outside_the_band_and_holds_inside() {
        let gate = HysteresisGate::default();
        assert_eq!(gate.evaluate(0.9), Some(DriveCommand::neutral()));
        assert_eq!(
            gate.evaluate(0.1),
            Some(DriveCommand {
                steering: 0.0,
                throttle: gate.cruise_speed,
            })
        );
        assert_eq!(gate.evaluate(0.55), None, "dead-band must hold");
    }

    #[test]
    fn hysteresis_boundaries_are_strict() {
        let gate = HysteresisGate::default();
        assert_eq!(gate.evaluate(gate.halt_above), None);
        assert_eq!(gate.evaluate(gate.resume_below), None);
    }

    #[test]
    fn commands_clamp_to_actuator_bounds() {
        let command = DriveCommand {
            steering: -1.8,
            throttle: 0.9,
        };
        let clamped = command.clamped(0.5);
        assert_eq!(clamped.steering, -1.0);
        assert_eq!(clamped.throttle, 0.5);
    }
}
