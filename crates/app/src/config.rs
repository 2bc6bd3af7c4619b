use std::{path::PathBuf, str::FromStr};

use anyhow::{Result, anyhow, bail};
use control_core::{
    DEFAULT_HALT_ABOVE, DEFAULT_RESUME_BELOW, DEFAULT_TARGET_THRESHOLD, DrivePolicy,
    HysteresisGate, ZoneMode,
};

pub(crate) const PRODUCE_USAGE: &str = "Usage: jetpilot produce --source <raw-rgb-file> \
[--width <px>] [--height <px>] [--bind <addr:port>] [--zones single|triple] \
[--jpeg-quality <1-100>] [--replay-fps <n>] [--live] [--model <path>] \
[--target-class <n>] [--cpu] [--verbose]";

pub(crate) const CONTROL_USAGE: &str = "Usage: jetpilot control [--connect <addr:port>] \
[--zones single|triple] [--threshold <p>] [--halt-above <p>] [--resume-below <p>] \
[--forward-speed <v>] [--turn-speed <v>] [--soft-steer <v>] [--hard-steer <v>] \
[--cruise-speed <v>] [--max-throttle <v>] [--actuator <device-path>] [--verbose]";

pub(crate) const VIEW_USAGE: &str =
    "Usage: jetpilot view [--connect <addr:port>] [--http <addr:port>]";

#[derive(Clone, Debug)]
pub(crate) struct ProducerConfig {
    pub(crate) source: PathBuf,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) bind: String,
    pub(crate) zone_mode: ZoneMode,
    pub(crate) jpeg_quality: i32,
    pub(crate) replay_fps: f32,
    pub(crate) live: bool,
    pub(crate) model: Option<PathBuf>,
    pub(crate) target_class: usize,
    pub(crate) use_cpu: bool,
    pub(crate) verbose: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct ControlConfig {
    pub(crate) connect: String,
    pub(crate) zone_mode: ZoneMode,
    pub(crate) threshold: f32,
    pub(crate) policy: DrivePolicy,
    pub(crate) gate: HysteresisGate,
    pub(crate) max_throttle: f32,
    pub(crate) actuator: Option<PathBuf>,
    pub(crate) verbose: bool,
}

#[derive(Clone, Debug)]
pub(crate) struct ViewerConfig {
    pub(crate) connect: String,
    pub(crate) http: String,
}

impl ProducerConfig {
    pub(crate) fn from_args(args: &[String]) -> Result<Self> {
        let mut source: Option<PathBuf> = None;
        let mut width: u32 = 320;
        let mut height: u32 = 224;
        let mut bind = "0.0.0.0:5555".to_string();
        let mut zone_mode = ZoneMode::Triple;
        let mut jpeg_quality: i32 = 50;
        let mut replay_fps: f32 = 30.0;
        let mut live = false;
        let mut model: Option<PathBuf> = None;
        let mut target_class: usize = 0;
        let mut use_cpu = false;
        let mut verbose = false;

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--source" => source = Some(PathBuf::from(value_of(args, &mut idx, "--source")?)),
                "--width" => width = parse_of(args, &mut idx, "--width", "a pixel count")?,
                "--height" => height = parse_of(args, &mut idx, "--height", "a pixel count")?,
                "--bind" => bind = value_of(args, &mut idx, "--bind")?.to_string(),
                "--zones" => zone_mode = parse_zone_mode(value_of(args, &mut idx, "--zones")?)?,
                "--jpeg-quality" => {
                    jpeg_quality =
                        parse_of(args, &mut idx, "--jpeg-quality", "an integer 1-100")?;
                    if !(1..=100).contains(&jpeg_quality) {
                        bail!("--jpeg-quality must be between 1 and 100");
                    }
                }
                "--replay-fps" => replay_fps = parse_of(args, &mut idx, "--replay-fps", "a rate")?,
                "--live" => live = true,
                "--model" => model = Some(PathBuf::from(value_of(args, &mut idx, "--model")?)),
                "--target-class" => {
                    target_class = parse_of(args, &mut idx, "--target-class", "a class index")?
                }
                "--cpu" => use_cpu = true,
                "--verbose" => verbose = true,
                other => bail!("Unrecognised flag: {other}\n\n{PRODUCE_USAGE}"),
            }
            idx += 1;
        }

        let source = source
            .ok_or_else(|| anyhow!("Missing --source <raw-rgb-file>.\n\n{PRODUCE_USAGE}"))?;
        if width == 0 || height == 0 {
            bail!("--width and --height must be positive");
        }
        if width < height {
            bail!("frame width must be at least the frame height (square zone crops)");
        }

        Ok(Self {
            source,
            width,
            height,
            bind,
            zone_mode,
            jpeg_quality,
            replay_fps,
            live,
            model,
            target_class,
            use_cpu,
            verbose,
        })
    }
}

impl ControlConfig {
    pub(crate) fn from_args(args: &[String]) -> Result<Self> {
        let mut connect = "127.0.0.1:5555".to_string();
        let mut zone_mode = ZoneMode::Triple;
        let mut threshold = DEFAULT_TARGET_THRESHOLD;
        let mut halt_above = DEFAULT_HALT_ABOVE;
        let mut resume_below = DEFAULT_RESUME_BELOW;
        let mut policy = DrivePolicy::default();
        let mut gate = HysteresisGate::default();
        let mut max_throttle: f32 = 1.0;
        let mut actuator: Option<PathBuf> = None;
        let mut verbose = false;

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--connect" => connect = value_of(args, &mut idx, "--connect")?.to_string(),
                "--zones" => zone_mode = parse_zone_mode(value_of(args, &mut idx, "--zones")?)?,
                "--threshold" => {
                    threshold = parse_of(args, &mut idx, "--threshold", "a probability")?
                }
                "--halt-above" => {
                    halt_above = parse_of(args, &mut idx, "--halt-above", "a probability")?
                }
                "--resume-below" => {
                    resume_below = parse_of(args, &mut idx, "--resume-below", "a probability")?
                }
                "--forward-speed" => {
                    policy.forward_speed = parse_of(args, &mut idx, "--forward-speed", "a speed")?
                }
                "--turn-speed" => {
                    policy.turn_speed = parse_of(args, &mut idx, "--turn-speed", "a speed")?
                }
                "--soft-steer" => {
                    policy.soft_steer = parse_of(args, &mut idx, "--soft-steer", "a steering value")?
                }
                "--hard-steer" => {
                    policy.hard_steer = parse_of(args, &mut idx, "--hard-steer", "a steering value")?
                }
                "--cruise-speed" => {
                    gate.cruise_speed = parse_of(args, &mut idx, "--cruise-speed", "a speed")?
                }
                "--max-throttle" => {
                    max_throttle = parse_of(args, &mut idx, "--max-throttle", "a throttle bound")?
                }
                "--actuator" => {
                    actuator = Some(PathBuf::from(value_of(args, &mut idx, "--actuator")?))
                }
                "--verbose" => verbose = true,
                other => bail!("Unrecognised flag: {other}\n\n{CONTROL_USAGE}"),
            }
            idx += 1;
        }

        if !(0.0..=1.0).contains(&threshold) {
            bail!("--threshold must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&halt_above) || !(0.0..=1.0).contains(&resume_below) {
            bail!("--halt-above and --resume-below must lie in [0, 1]");
        }
        if resume_below >= halt_above {
            bail!("--resume-below must be strictly below --halt-above (dead-band)");
        }
        gate.halt_above = halt_above;
        gate.resume_below = resume_below;

        Ok(Self {
            connect,
            zone_mode,
            threshold,
            policy,
            gate,
            max_throttle,
            actuator,
            verbose,
        })
    }
}

impl ViewerConfig {
    pub(crate) fn from_args(args: &[String]) -> Result<Self> {
        let mut connect = "127.0.0.1:5555".to_string();
        let mut http = "0.0.0.0:8080".to_string();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--connect" => connect = value_of(args, &mut idx, "--connect")?.to_string(),
                "--http" => http = value_of(args, &mut idx, "--http")?.to_string(),
                other => bail!("Unrecognised flag: {other}\n\n{VIEW_USAGE}"),
            }
            idx += 1;
        }

        Ok(Self { connect, http })
    }
}

fn value_of<'a>(args: &'a [String], idx: &mut usize, flag: &str) -> Result<&'a str> {
    *idx += 1;
    args.get(*idx)
        .map(|value| value.as_str())
        .ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn parse_of<T: FromStr>(args: &[String], idx: &mut usize, flag: &str, what: &str) -> Result<T> {
    let raw = value_of(args, idx, flag)?;
    raw.parse::<T>()
        .map_err(|_| anyhow!("{flag} must be {what}, got {raw:?}"))
}

fn parse_zone_mode(value: &str) -> Result<ZoneMode> {
    match value {
        "single" => Ok(ZoneMode::Single),
        "triple" => Ok(ZoneMode::Triple),
        other => bail!("--zones must be `single` or `triple`, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        let mut full = vec!["jetpilot".to_string(), "sub".to_string()];
        full.extend(list.iter().map(|s| s.to_string()));
        full
    }

    #[test]
    fn producer_defaults_match_the_reference_deployment() {
        let config =
            ProducerConfig::from_args(&args(&["--source", "drive.rgb"])).expect("parse failed");
        assert_eq!(config.width, 320);
        assert_eq!(config.height, 224);
        assert_eq!(config.zone_mode, ZoneMode::Triple);
        assert_eq!(config.jpeg_quality, 50);
        assert!(!config.live);
    }

    #[test]
    fn producer_requires_a_source() {
        assert!(ProducerConfig::from_args(&args(&[])).is_err());
    }

    #[test]
    fn producer_rejects_frames_narrower_than_tall() {
        let result = ProducerConfig::from_args(&args(&[
            "--source", "drive.rgb", "--width", "100", "--height", "224",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn control_defaults_use_the_documented_thresholds() {
        let config = ControlConfig::from_args(&args(&[])).expect("parse failed");
        assert_eq!(config.threshold, DEFAULT_TARGET_THRESHOLD);
        assert_eq!(config.gate.halt_above, DEFAULT_HALT_ABOVE);
        assert_eq!(config.gate.resume_below, DEFAULT_RESUME_BELOW);
    }

    #[test]
    fn control_rejects_an_inverted_dead_band() {
        let result =
            ControlConfig::from_args(&args(&["--halt-above", "0.3", "--resume-below", "0.7"]));
        assert!(result.is_err());
    }

    #[test]
    fn zone_mode_flag_is_parsed() {
        let config = ControlConfig::from_args(&args(&["--zones", "single"])).expect("parse failed");
        assert_eq!(config.zone_mode, ZoneMode::Single);
        assert!(ControlConfig::from_args(&args(&["--zones", "five"])).is_err());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(ViewerConfig::from_args(&args(&["--bogus"])).is_err());
    }
}
