use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::error;

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
pub(crate) const WATCHDOG_STALE_THRESHOLD_MS: u64 = 1_500;
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

#[derive(Copy, Clone, Debug)]
pub(crate) enum HealthComponent {
    Capture,
    Inference,
    Publish,
}

impl HealthComponent {
    pub(crate) fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Inference => "inference",
            HealthComponent::Publish => "publish",
        }
    }
}

pub(crate) struct PipelineHealth {
    capture: AtomicU64,
    inference: AtomicU64,
    publish: AtomicU64,
}

impl PipelineHealth {
    pub(crate) fn new() -> Self {
        let now = current_millis();
        let grace_deadline = now.saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        Self {
            capture: AtomicU64::new(grace_deadline),
            inference: AtomicU64::new(grace_deadline),
            publish: AtomicU64::new(grace_deadline),
        }
    }

    pub(crate) fn beat(&self, component: HealthComponent) {
        let now = current_millis();
        match component {
            HealthComponent::Capture => self.capture.store(now, Ordering::Relaxed),
            HealthComponent::Inference => self.inference.store(now, Ordering::Relaxed),
            HealthComponent::Publish => self.publish.store(now, Ordering::Relaxed),
        }
    }

    pub(crate) fn stale_component(&self, now: u64) -> Option<HealthComponent> {
        if now.saturating_sub(self.capture.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS {
            return Some(HealthComponent::Capture);
        }
        if now.saturating_sub(self.inference.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS
        {
            return Some(HealthComponent::Inference);
        }
        if now.saturating_sub(self.publish.load(Ordering::Relaxed)) > WATCHDOG_STALE_THRESHOLD_MS {
            return Some(HealthComponent::Publish);
        }
        None
    }
}

pub(crate) struct WatchdogState {
    triggered: AtomicBool,
    reason: Mutex<Option<HealthComponent>>,
}

impl WatchdogState {
    pub(crate) fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    pub(crate) fn arm(&self, component: HealthComponent) {
        if let Ok(mut guard) = self.reason.lock() {
            *guard = Some(component);
        }
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn reason(&self) -> Option<HealthComponent> {
        match self.reason.lock() {
            Ok(guard) => *guard,
            Err(_) => None,
        }
    }
}

pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    state: Arc<WatchdogState>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("producer-watchdog".into())
        .spawn(move || {
            while running.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
                let now = current_millis();
                if let Some(component) = health.stale_component(now) {
                    error!(
                        "Watchdog detected stalled {} stage; requesting pipeline restart",
                        component.label()
                    );
                    state.arm(component);
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        })
        .expect("failed to spawn watchdog thread")
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_health_is_not_stale_during_grace() {
        let health = PipelineHealth::new();
        let now = current_millis();
        assert!(health.stale_component(now).is_none());
        assert!(
            health
                .stale_component(now + WATCHDOG_STARTUP_GRACE_MS)
                .is_none()
        );
    }

    #[test]
    fn silent_component_goes_stale_after_the_threshold() {
        let health = PipelineHealth::new();
        let now = current_millis();
        let stale_at = now + WATCHDOG_STARTUP_GRACE_MS + WATCHDOG_STALE_THRESHOLD_MS + 1;
        let component = health.stale_component(stale_at);
        assert!(matches!(component, Some(HealthComponent::Capture)));
    }

    #[test]
    fn heartbeat_resets_staleness() {
        let health = PipelineHealth::new();
        health.beat(HealthComponent::Capture);
        health.beat(HealthComponent::Inference);
        health.beat(HealthComponent::Publish);
        let now = current_millis();
        assert!(health.stale_component(now).is_none());
        assert!(
            health
                .stale_component(now + WATCHDOG_STALE_THRESHOLD_MS + 1)
                .is_some()
        );
    }

    #[test]
    fn armed_state_reports_the_reason() {
        let state = WatchdogState::new();
        assert!(!state.is_triggered());
        state.arm(HealthComponent::Inference);
        assert!(state.is_triggered());
        assert!(matches!(state.reason(), Some(HealthComponent::Inference)));
    }
}
