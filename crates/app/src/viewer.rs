//! Monitoring server exposing the latest sample over HTTP.
//!
//! The viewer is an independent subscriber with the same lossy-transport
//! contract as the controller but no decision logic. Actix runs on a
//! dedicated thread so the subscription pump stays free of async runtime
//! concerns; handlers only ever read the shared latest-sample cell.

use std::{
    sync::{
        Arc, Mutex, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use chrono::Utc;
use control_core::{TelemetrySample, ZoneProbabilities};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{config::ViewerConfig, telemetry};

type SharedSample = Arc<Mutex<Option<TelemetrySample>>>;

const VIEWER_HTML: &str = r#"<html>
<head><title>jetpilot</title></head>
<body style="background: #222; color: #eee; text-align: center; font-family: monospace;">
    <h1>jetpilot live view</h1>
    <div id="status" style="margin-bottom: 10px; color: #aaa;">waiting for telemetry...</div>
    <img src="/stream.mjpg" style="border: 2px solid #444; width: 672px; image-rendering: pixelated;"/>
    <script>
        setInterval(async () => {
            const el = document.getElementById('status');
            try {
                const res = await fetch('/status');
                if (!res.ok) { el.textContent = 'no sample yet'; return; }
                const s = await res.json();
                const zones = s.zone_probabilities
                    ? ` L ${s.zone_probabilities.left.toFixed(2)} C ${s.zone_probabilities.center.toFixed(2)} R ${s.zone_probabilities.right.toFixed(2)}`
                    : ` p ${s.primary_probability.toFixed(2)}`;
                el.textContent = `${zones} | ${s.capture_fps.toFixed(1)} fps | lag ${s.age_ms} ms`;
            } catch (err) {
                el.textContent = 'viewer offline';
            }
        }, 500);
    </script>
</body>
</html>
"#;

/// Shared state backing HTTP handlers.
struct ViewerState {
    latest: SharedSample,
}

#[derive(Serialize)]
struct StatusResponse<'a> {
    zone_probabilities: Option<&'a ZoneProbabilities>,
    primary_probability: f32,
    capture_fps: f32,
    emitted_at_ms: i64,
    age_ms: i64,
}

/// Handle for the viewer server thread.
struct ViewerServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ViewerServer {
    /// Signal the server to stop and block until the thread exits.
    fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Run the viewer until Ctrl+C.
pub(crate) fn run(config: ViewerConfig) -> Result<()> {
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

    let mut subscription = telemetry_link::connect::<TelemetrySample>(&config.connect)
        .with_context(|| format!("transport unavailable: cannot subscribe to {}", config.connect))?;

    let latest: SharedSample = Arc::new(Mutex::new(None));
    let feed = latest.clone();
    telemetry::spawn_thread("viewer-feed", move || {
        while let Ok(sample) = subscription.recv() {
            metrics::gauge!("pilot_viewer_fps").set(sample.capture_fps as f64);
            metrics::counter!("pilot_viewer_samples_total").increment(1);
            if let Ok(mut guard) = feed.lock() {
                *guard = Some(sample);
            }
        }
    })
    .context("Failed to spawn viewer feed thread")?;

    let server = spawn_viewer_server(&config.http, latest)?;
    info!(
        "viewer serving http://{} (frame.jpg, stream.mjpg, status, metrics)",
        config.http
    );

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }
    server.stop();
    info!("viewer stopped");
    Ok(())
}

/// Spawn the server thread and return a handle that can stop it.
fn spawn_viewer_server(http_addr: &str, latest: SharedSample) -> Result<ViewerServer> {
    let bind_addr = http_addr.to_string();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<std::io::Result<()>>();

    let handle = thread::Builder::new()
        .name("viewer-server".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                let server = match HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(ViewerState {
                            latest: latest.clone(),
                        }))
                        .route("/", web::get().to(index_route))
                        .route("/frame.jpg", web::get().to(frame_handler))
                        .route("/stream.mjpg", web::get().to(stream_handler))
                        .route("/status", web::get().to(status_handler))
                        .route("/metrics", web::get().to(metrics_handler))
                })
                .disable_signals()
                .bind(&bind_addr)
                {
                    Ok(server) => {
                        let _ = ready_tx.send(Ok(()));
                        server.run()
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return Ok(());
                    }
                };

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            }) {
                error!("HTTP server error: {err}");
            }
        })
        .context("Failed to spawn viewer server thread")?;

    ready_rx
        .recv()
        .context("viewer server thread exited before binding")?
        .context("failed to bind viewer HTTP endpoint")?;

    Ok(ViewerServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Fetch the latest sample from the shared cell.
fn latest_sample(shared: &SharedSample) -> Option<TelemetrySample> {
    match shared.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(VIEWER_HTML)
}

/// Return the latest frame payload as a single JPEG.
async fn frame_handler(state: web::Data<ViewerState>) -> HttpResponse {
    match latest_sample(&state.latest) {
        Some(sample) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(sample.frame_payload),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream the latest frames as a multipart MJPEG feed.
async fn stream_handler(state: web::Data<ViewerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(33));
        let mut last_emitted = i64::MIN;
        loop {
            interval.tick().await;
            let sample = latest_sample(&state.latest);
            if let Some(sample) = sample {
                if sample.emitted_at_ms == last_emitted {
                    continue;
                }
                last_emitted = sample.emitted_at_ms;
                let mut payload = Vec::with_capacity(sample.frame_payload.len() + 64);
                payload.extend_from_slice(b"--frame\r\n");
                payload.extend_from_slice(
                    format!("X-Emitted-At: {}\r\n", sample.emitted_at_ms).as_bytes(),
                );
                payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                payload.extend_from_slice(&sample.frame_payload);
                payload.extend_from_slice(b"\r\n");
                yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Return the latest probability snapshot as JSON.
async fn status_handler(state: web::Data<ViewerState>) -> HttpResponse {
    let guard = match state.latest.lock() {
        Ok(guard) => guard,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };
    if let Some(ref sample) = *guard {
        HttpResponse::Ok().json(StatusResponse {
            zone_probabilities: sample.zone_probabilities.as_ref(),
            primary_probability: sample.primary_probability,
            capture_fps: sample.capture_fps,
            emitted_at_ms: sample.emitted_at_ms,
            age_ms: Utc::now().timestamp_millis() - sample.emitted_at_ms,
        })
    } else {
        HttpResponse::NoContent().finish()
    }
}

/// Render this process's Prometheus registry.
async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}
