//! Control loop: receive the newest sample, derive zone state, decide, apply.
//!
//! The loop is deliberately thin. All decision logic lives in `control-core`
//! as pure functions; this module only moves samples from the subscription to
//! the actuator and enforces the shutdown safety invariant: whatever path the
//! loop exits through, the last command issued is the neutral one.

use std::{
    fs::OpenOptions,
    io::Write,
    path::Path,
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::Utc;
use control_core::{DriveCommand, TelemetrySample, ZoneMode, ZoneState};
use telemetry_link::mailbox::Subscriber;
use tracing::{debug, info, warn};

use crate::{config::ControlConfig, telemetry};

const RECEIVE_POLL_MS: u64 = 250;

/// Actuator collaborator boundary. Fire-and-forget; failures are logged and
/// the next cycle simply reissues a command.
pub(crate) trait Actuator {
    fn apply(&mut self, command: DriveCommand) -> Result<()>;
}

/// Writes commands as text lines to a character device or, by default, the
/// process log.
pub(crate) enum LineActuator {
    Device(std::fs::File),
    Log,
}

impl LineActuator {
    pub(crate) fn device(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("actuator collaborator unavailable at {path:?}"))?;
        Ok(LineActuator::Device(file))
    }
}

impl Actuator for LineActuator {
    fn apply(&mut self, command: DriveCommand) -> Result<()> {
        match self {
            LineActuator::Device(file) => {
                writeln!(file, "steer {:+.3} throttle {:.3}", command.steering, command.throttle)?;
                file.flush()?;
            }
            LineActuator::Log => {
                info!(
                    "command: steer {:+.3} throttle {:.3}",
                    command.steering, command.throttle
                );
            }
        }
        Ok(())
    }
}

/// Run the controller until Ctrl+C.
pub(crate) fn run(config: ControlConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler({
            let handler_shutdown = handler_shutdown.clone();
            move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let _ = telemetry::init_metrics_recorder();

    let subscription = telemetry_link::connect::<TelemetrySample>(&config.connect)
        .with_context(|| format!("transport unavailable: cannot subscribe to {}", config.connect))?;
    let mut actuator = match &config.actuator {
        Some(path) => LineActuator::device(path)?,
        None => LineActuator::Log,
    };
    info!("controller connected to {}; waiting for telemetry", config.connect);

    run_control_loop(&config, subscription, &mut actuator, &shutdown)
}

/// Drain samples until shutdown, then neutralize the actuator.
///
/// Takes the subscription and actuator as plain values so tests can drive the
/// loop with an in-process mailbox and a recording actuator.
pub(crate) fn run_control_loop(
    config: &ControlConfig,
    mut subscription: Subscriber<TelemetrySample>,
    actuator: &mut dyn Actuator,
    shutdown: &AtomicBool,
) -> Result<()> {
    while !shutdown.load(Ordering::Relaxed) {
        let sample = match subscription.recv_timeout(Duration::from_millis(RECEIVE_POLL_MS)) {
            Ok(Some(sample)) => sample,
            Ok(None) => continue,
            Err(_) => {
                info!("telemetry publisher went away; stopping controller");
                break;
            }
        };

        if let Err(err) = sample.validate() {
            warn!("discarding malformed sample: {err}");
            metrics::counter!("pilot_malformed_samples_total").increment(1);
            continue;
        }

        let age_ms = Utc::now().timestamp_millis() - sample.emitted_at_ms;
        metrics::histogram!("pilot_sample_age_ms").record(age_ms as f64);

        let command = match config.zone_mode {
            ZoneMode::Triple => {
                let Some(zones) = sample.zone_probabilities else {
                    warn!("discarding malformed sample: zone map missing in triple-zone mode");
                    metrics::counter!("pilot_malformed_samples_total").increment(1);
                    continue;
                };
                let state = ZoneState::from_probabilities(&zones, config.threshold);
                if config.verbose {
                    debug!(
                        "[L:{} C:{} R:{}] raw L{:.2} C{:.2} R{:.2} fps {:.1} lag {age_ms}ms",
                        state.left as u8,
                        state.center as u8,
                        state.right as u8,
                        zones.left,
                        zones.center,
                        zones.right,
                        sample.capture_fps
                    );
                }
                Some(config.policy.decide(state))
            }
            // Inside the dead-band the gate issues nothing and the previous
            // command stays in force at the actuator.
            ZoneMode::Single => config.gate.evaluate(sample.primary_probability),
        };

        if let Some(command) = command {
            let command = command.clamped(config.max_throttle);
            if let Err(err) = actuator.apply(command) {
                warn!("actuator rejected command: {err}");
            }
            metrics::counter!("pilot_commands_applied_total").increment(1);
        }
    }

    // Safety invariant: neutral command on every exit path.
    if let Err(err) = actuator.apply(DriveCommand::neutral()) {
        warn!("failed to neutralize actuator on shutdown: {err}");
    }
    info!("controller stopped; actuator neutralized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_core::{DrivePolicy, HysteresisGate, ZoneProbabilities};
    use std::{
        sync::Mutex,
        thread,
        time::{Duration, Instant},
    };

    struct RecordingActuator {
        commands: Arc<Mutex<Vec<DriveCommand>>>,
    }

    impl Actuator for RecordingActuator {
        fn apply(&mut self, command: DriveCommand) -> Result<()> {
            self.commands
                .lock()
                .expect("command log poisoned")
                .push(command);
            Ok(())
        }
    }

    fn test_config(zone_mode: ZoneMode) -> ControlConfig {
        ControlConfig {
            connect: "127.0.0.1:0".into(),
            zone_mode,
            threshold: 0.60,
            policy: DrivePolicy::default(),
            gate: HysteresisGate::default(),
            max_throttle: 1.0,
            actuator: None,
            verbose: false,
        }
    }

    fn sample(zones: Option<ZoneProbabilities>, primary: f32) -> TelemetrySample {
        TelemetrySample {
            zone_probabilities: zones,
            primary_probability: primary,
            frame_payload: Vec::new(),
            capture_fps: 30.0,
            emitted_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Spin up the loop on a thread fed by an in-process mailbox.
    fn harness(
        config: ControlConfig,
    ) -> (
        telemetry_link::Publisher<TelemetrySample>,
        Arc<Mutex<Vec<DriveCommand>>>,
        Arc<AtomicBool>,
        thread::JoinHandle<()>,
    ) {
        let (publisher, subscription) = telemetry_link::latest();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = {
            let commands = commands.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                let mut actuator = RecordingActuator { commands };
                run_control_loop(&config, subscription, &mut actuator, &shutdown)
                    .expect("control loop failed");
            })
        };
        (publisher, commands, shutdown, handle)
    }

    fn wait_for_commands(commands: &Arc<Mutex<Vec<DriveCommand>>>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if commands.lock().expect("command log poisoned").len() >= count {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("controller never applied {count} command(s)");
    }

    #[test]
    fn shutdown_always_ends_with_the_neutral_command() {
        let (publisher, commands, shutdown, handle) = harness(test_config(ZoneMode::Triple));

        publisher.publish(sample(
            Some(ZoneProbabilities {
                left: 0.1,
                center: 0.9,
                right: 0.1,
            }),
            0.9,
        ));
        wait_for_commands(&commands, 1);

        shutdown.store(true, Ordering::SeqCst);
        handle.join().expect("loop thread panicked");

        let log = commands.lock().expect("command log poisoned");
        let first = log.first().expect("no command applied");
        assert!(first.throttle > 0.0, "expected a forward command first");
        assert_eq!(*log.last().expect("no final command"), DriveCommand::neutral());
    }

    #[test]
    fn malformed_samples_apply_no_command() {
        let (publisher, commands, shutdown, handle) = harness(test_config(ZoneMode::Triple));

        // Out-of-range probability, then a missing zone map.
        publisher.publish(sample(
            Some(ZoneProbabilities {
                left: 1.4,
                center: 0.2,
                right: 0.2,
            }),
            0.2,
        ));
        thread::sleep(Duration::from_millis(150));
        publisher.publish(sample(None, 0.2));
        thread::sleep(Duration::from_millis(150));

        shutdown.store(true, Ordering::SeqCst);
        handle.join().expect("loop thread panicked");

        let log = commands.lock().expect("command log poisoned");
        // Only the shutdown neutral command may appear.
        assert_eq!(log.as_slice(), &[DriveCommand::neutral()]);
    }

    #[test]
    fn dead_band_holds_the_previous_command() {
        let config = test_config(ZoneMode::Single);
        let cruise_speed = config.gate.cruise_speed;
        let (publisher, commands, shutdown, handle) = harness(config);

        publisher.publish(sample(None, 0.1));
        wait_for_commands(&commands, 1);
        assert_eq!(
            commands.lock().expect("command log poisoned")[0].throttle,
            cruise_speed
        );

        // Inside the dead-band: nothing new is applied.
        publisher.publish(sample(None, 0.55));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(commands.lock().expect("command log poisoned").len(), 1);

        // Above the halt threshold: a stop command goes out.
        publisher.publish(sample(None, 0.95));
        wait_for_commands(&commands, 2);
        assert_eq!(
            commands.lock().expect("command log poisoned")[1],
            DriveCommand::neutral()
        );

        shutdown.store(true, Ordering::SeqCst);
        handle.join().expect("loop thread panicked");
    }

    #[test]
    fn commands_respect_the_throttle_bound() {
        let mut config = test_config(ZoneMode::Triple);
        config.policy.forward_speed = 2.0;
        config.max_throttle = 0.5;
        let (publisher, commands, shutdown, handle) = harness(config);

        publisher.publish(sample(
            Some(ZoneProbabilities {
                left: 0.0,
                center: 0.9,
                right: 0.0,
            }),
            0.9,
        ));
        wait_for_commands(&commands, 1);
        assert_eq!(commands.lock().expect("command log poisoned")[0].throttle, 0.5);

        shutdown.store(true, Ordering::SeqCst);
        handle.join().expect("loop thread panicked");
    }
}
