//! Producer pipeline: capture → per-zone inference → sample assembly →
//! publish, supervised with automatic restart on recoverable faults.
//!
//! Publishing goes through the lossy latest-value link, so a slow or absent
//! consumer never backpressures this loop. The transport is bound once, before
//! the supervisor loop; a bind failure is fatal before any frame is captured.

use std::{
    path::Path,
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::Utc;
use control_core::{ImageRegion, TelemetrySample, Zone, ZoneMode, ZoneProbabilities, crop_zone};
use crossbeam_channel::RecvTimeoutError;
use telemetry_link::NetPublisher;
use tracing::{debug, error, info, warn};

use crate::{
    capture::{self, FrameSource, RawFileSource, RawFrame, SourceKind},
    classify::{Classifier, LumaClassifier},
    config::ProducerConfig,
    encode, telemetry,
    watchdog::{HealthComponent, PipelineHealth, WatchdogState, spawn_watchdog},
};

const CAPTURE_POLL_MS: u64 = 500;
const RESTART_BACKOFF_MS: u64 = 1_000;

/// Run the producer, restarting the pipeline on recoverable faults until a
/// shutdown signal or a hard failure.
pub(crate) fn run(config: ProducerConfig) -> Result<()> {
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

    let publisher = telemetry_link::bind::<TelemetrySample>(&config.bind)
        .with_context(|| format!("transport unavailable: failed to bind {}", config.bind))?;
    info!("publishing telemetry on {}", publisher.local_addr());

    let mut attempt: u32 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match run_producer_once(&config, &publisher, shutdown.clone())? {
            ProducerOutcome::Graceful => break,
            ProducerOutcome::Restart(reason) => {
                attempt = attempt.saturating_add(1);
                warn!("Producer restarting (reason: {reason}), attempt #{attempt}");
                thread::sleep(Duration::from_millis(RESTART_BACKOFF_MS));
            }
        }
    }

    info!("producer stopped");
    Ok(())
}

/// Result of a single pipeline run attempt.
enum ProducerOutcome {
    Graceful,
    Restart(&'static str),
}

fn run_producer_once(
    config: &ProducerConfig,
    publisher: &NetPublisher<TelemetrySample>,
    shutdown: Arc<AtomicBool>,
) -> Result<ProducerOutcome> {
    let source = open_source(config)?;
    let classifier = build_classifier(config)?;

    let health = Arc::new(PipelineHealth::new());
    let running = Arc::new(AtomicBool::new(true));
    let watchdog_state = Arc::new(WatchdogState::new());
    let watchdog = spawn_watchdog(
        health.clone(),
        running.clone(),
        shutdown.clone(),
        watchdog_state.clone(),
    );
    let frames = capture::spawn_capture_reader(source, running.clone());

    let mut frame_number: u64 = 0;
    let mut last_iteration: Option<Instant> = None;
    let mut fault: Option<anyhow::Error> = None;
    let mut restart_reason: Option<&'static str> = None;

    while running.load(Ordering::Relaxed) {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let frame = match frames.recv_timeout(Duration::from_millis(CAPTURE_POLL_MS)) {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                fault = Some(anyhow::Error::new(err).context("capture collaborator failed"));
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                restart_reason = Some("capture channel closed");
                break;
            }
        };
        health.beat(HealthComponent::Capture);
        frame_number = frame_number.wrapping_add(1);

        let now = Instant::now();
        let capture_fps = match last_iteration.replace(now) {
            Some(previous) => reciprocal_fps(now.duration_since(previous).as_secs_f32()),
            None => 0.0,
        };
        metrics::gauge!("pilot_capture_fps").set(capture_fps as f64);

        let iteration_start = Instant::now();
        let sample = match build_sample(config, classifier.as_ref(), &frame, capture_fps) {
            Ok(sample) => sample,
            Err(err) => {
                error!("sample assembly failed: {err:?}");
                restart_reason = Some("sample assembly failure");
                break;
            }
        };
        health.beat(HealthComponent::Inference);
        let sample_primary = sample.primary_probability;

        publisher.publish(sample);
        health.beat(HealthComponent::Publish);
        metrics::counter!("pilot_samples_published_total").increment(1);
        metrics::histogram!("pilot_iteration_seconds")
            .record(iteration_start.elapsed().as_secs_f64());

        if config.verbose {
            debug!(
                "frame #{frame_number}: primary {:.3}, {capture_fps:.1} fps",
                sample_primary
            );
        } else if frame_number % 30 == 0 {
            debug!("publish heartbeat: frame #{frame_number}, {capture_fps:.1} fps");
        }
    }

    running.store(false, Ordering::SeqCst);
    drop(frames);
    let _ = watchdog.join();

    if let Some(err) = fault {
        return Err(err);
    }
    if watchdog_state.is_triggered() {
        let reason = watchdog_state
            .reason()
            .map(|component| component.label())
            .unwrap_or("watchdog");
        return Ok(ProducerOutcome::Restart(reason));
    }
    if let Some(reason) = restart_reason {
        return Ok(ProducerOutcome::Restart(reason));
    }
    Ok(ProducerOutcome::Graceful)
}

/// Reciprocal of the wall-clock delta between iteration starts; zero on the
/// first iteration and across clock anomalies.
fn reciprocal_fps(elapsed_seconds: f32) -> f32 {
    if elapsed_seconds > 0.0 {
        1.0 / elapsed_seconds
    } else {
        0.0
    }
}

fn open_source(config: &ProducerConfig) -> Result<Box<dyn FrameSource>> {
    let kind = if config.live {
        SourceKind::Live
    } else {
        SourceKind::Finite
    };
    let source = RawFileSource::open(
        &config.source,
        config.width,
        config.height,
        config.replay_fps,
        kind,
    )
    .with_context(|| format!("capture collaborator failed to open {:?}", config.source))?;
    Ok(Box::new(source))
}

fn build_classifier(config: &ProducerConfig) -> Result<Box<dyn Classifier>> {
    match &config.model {
        Some(path) => load_torch_classifier(path, config),
        None => {
            info!("no model supplied; using luminance stand-in classifier");
            Ok(Box::new(LumaClassifier::default()))
        }
    }
}

#[cfg(feature = "with-tch")]
fn load_torch_classifier(path: &Path, config: &ProducerConfig) -> Result<Box<dyn Classifier>> {
    let classifier = crate::classify::TorchClassifier::load(path, config.use_cpu, config.target_class)?;
    info!("TorchScript classifier loaded from {path:?}");
    Ok(Box::new(classifier))
}

#[cfg(not(feature = "with-tch"))]
fn load_torch_classifier(path: &Path, _config: &ProducerConfig) -> Result<Box<dyn Classifier>> {
    anyhow::bail!("--model {path:?} requires a build with the `with-tch` feature")
}

/// One frame in, one complete sample out. Every configured zone must produce
/// a probability before anything is published; there are no partial samples.
fn build_sample(
    config: &ProducerConfig,
    classifier: &dyn Classifier,
    frame: &RawFrame,
    capture_fps: f32,
) -> Result<TelemetrySample> {
    let (zone_probabilities, primary_probability) = match config.zone_mode {
        ZoneMode::Triple => {
            let mut probabilities = [0.0f32; 3];
            for (slot, zone) in probabilities.iter_mut().zip(Zone::ALL) {
                let region = crop_zone(&frame.data, frame.width, frame.height, zone)?;
                *slot = classifier
                    .classify(&region)
                    .with_context(|| format!("classifying {} zone", zone.label()))?;
                metrics::gauge!("pilot_zone_probability", "zone" => zone.label())
                    .set(*slot as f64);
            }
            let zones = ZoneProbabilities {
                left: probabilities[0],
                center: probabilities[1],
                right: probabilities[2],
            };
            (Some(zones), zones.center)
        }
        ZoneMode::Single => {
            let region = ImageRegion {
                data: frame.data.clone(),
                width: frame.width,
                height: frame.height,
            };
            let probability = classifier.classify(&region).context("classifying frame")?;
            metrics::gauge!("pilot_zone_probability", "zone" => "primary").set(probability as f64);
            (None, probability)
        }
    };

    let frame_payload = encode::encode_frame_jpeg(frame, config.jpeg_quality)?;

    Ok(TelemetrySample {
        zone_probabilities,
        primary_probability,
        frame_payload,
        capture_fps,
        emitted_at_ms: Utc::now().timestamp_millis(),
    })
}
