use std::any::Any;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AppError;

/// Acceleration magnitude a raw reading must exceed before the manual
/// counter credits a step. Resting gravity is ~9.8, so quiet readings
/// stay below this.
pub const MOTION_MAGNITUDE_THRESHOLD: f32 = 12.0;

const OBSERVATION_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    StepCounter,
    Accelerometer,
}

#[derive(Debug, Clone, Copy)]
pub enum RawReading {
    /// Cumulative count from a dedicated step-counting sensor.
    StepCount(u64),
    /// Three-axis sample from a general motion sensor.
    Motion { x: f32, y: f32, z: f32 },
}

/// Keep-alive for a hardware listener registration; dropping it
/// deregisters the listener.
pub struct ListenerGuard {
    _keepalive: Box<dyn Any + Send>,
}

impl ListenerGuard {
    pub fn new(keepalive: impl Any + Send) -> Self {
        Self {
            _keepalive: Box::new(keepalive),
        }
    }
}

/// Seam to the device motion-sensor subsystem. Implementations answer
/// capability queries and deliver raw readings at whatever cadence the OS
/// chooses.
pub trait MotionHardware: Send + Sync + 'static {
    fn available(&self, kind: SensorKind) -> bool;

    /// Deliver raw readings from `kind` into `tx` until the returned
    /// guard is dropped.
    fn listen(
        &self,
        kind: SensorKind,
        tx: mpsc::UnboundedSender<RawReading>,
    ) -> Result<ListenerGuard, AppError>;
}

/// Hardware stub for hosts without motion sensors; the source degrades to
/// a single zero observation.
pub struct NoMotionSensors;

impl MotionHardware for NoMotionSensors {
    fn available(&self, _kind: SensorKind) -> bool {
        false
    }

    fn listen(
        &self,
        _kind: SensorKind,
        _tx: mpsc::UnboundedSender<RawReading>,
    ) -> Result<ListenerGuard, AppError> {
        Err(AppError::Internal(
            "No motion hardware available".to_string(),
        ))
    }
}

/// One logical stream of cumulative step counts over whichever physical
/// sensor is available. The hardware listener is registered when the
/// first consumer subscribes and deregistered exactly once when the last
/// consumer unsubscribes. This component never touches storage.
#[derive(Clone)]
pub struct SensorSource {
    hardware: Arc<dyn MotionHardware>,
    state: Arc<Mutex<SourceState>>,
}

#[derive(Default)]
struct SourceState {
    subscribers: usize,
    active: Option<ActiveListener>,
}

struct ActiveListener {
    counts_tx: broadcast::Sender<u64>,
    guard: Option<ListenerGuard>,
    pump: Option<JoinHandle<()>>,
}

impl ActiveListener {
    fn is_degraded(&self) -> bool {
        self.guard.is_none()
    }
}

impl SensorSource {
    pub fn new(hardware: Arc<dyn MotionHardware>) -> Self {
        Self {
            hardware,
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    pub fn subscribe(&self) -> StepStream {
        let mut state = self.state.lock().unwrap();
        let active = match state.active.take() {
            Some(active) => active,
            None => self.activate(),
        };

        let rx = active.counts_tx.subscribe();
        if active.is_degraded() {
            // Single zero observation, then silence.
            let _ = active.counts_tx.send(0);
        }

        state.active = Some(active);
        state.subscribers += 1;

        StepStream {
            rx,
            guard: SensorGuard {
                state: Arc::clone(&self.state),
            },
        }
    }

    /// Capability selection in priority order: dedicated step counter,
    /// then the accelerometer heuristic, then degraded mode.
    fn activate(&self) -> ActiveListener {
        let (counts_tx, _) = broadcast::channel(OBSERVATION_BUFFER);

        let kind = if self.hardware.available(SensorKind::StepCounter) {
            SensorKind::StepCounter
        } else if self.hardware.available(SensorKind::Accelerometer) {
            SensorKind::Accelerometer
        } else {
            info!("No motion hardware available, degrading to a single zero");
            return ActiveListener {
                counts_tx,
                guard: None,
                pump: None,
            };
        };

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        match self.hardware.listen(kind, raw_tx) {
            Ok(guard) => {
                info!(?kind, "Registered motion listener");
                let pump = tokio::spawn(pump_readings(kind, raw_rx, counts_tx.clone()));
                ActiveListener {
                    counts_tx,
                    guard: Some(guard),
                    pump: Some(pump),
                }
            }
            Err(e) => {
                // Absence of working hardware is degraded mode, not failure.
                warn!(error = %e, ?kind, "Motion listener registration failed, degrading");
                ActiveListener {
                    counts_tx,
                    guard: None,
                    pump: None,
                }
            }
        }
    }
}

/// Converts raw hardware readings into cumulative step counts. A
/// dedicated step counter is forwarded unmodified; accelerometer samples
/// drive a manual counter through the magnitude threshold.
async fn pump_readings(
    kind: SensorKind,
    mut raw_rx: mpsc::UnboundedReceiver<RawReading>,
    counts_tx: broadcast::Sender<u64>,
) {
    let mut manual_count: u64 = 0;
    while let Some(reading) = raw_rx.recv().await {
        let next = match reading {
            RawReading::StepCount(count) => Some(count),
            RawReading::Motion { x, y, z } => {
                let magnitude = (x * x + y * y + z * z).sqrt();
                if magnitude > MOTION_MAGNITUDE_THRESHOLD {
                    manual_count += 1;
                    Some(manual_count)
                } else {
                    None
                }
            }
        };
        if let Some(count) = next {
            let _ = counts_tx.send(count);
        }
    }
    debug!(?kind, "Motion reading pump stopped");
}

/// A consumer's handle on the step-count stream. Dropping it releases the
/// subscription; the last drop deregisters the hardware listener.
pub struct StepStream {
    rx: broadcast::Receiver<u64>,
    guard: SensorGuard,
}

impl StepStream {
    /// Next cumulative observation. Returns `None` once the source has
    /// shut down.
    pub async fn next(&mut self) -> Option<u64> {
        loop {
            match self.rx.recv().await {
                Ok(count) => return Some(count),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Sensor observations lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Split into the unsubscribe guard and the raw receiver, for callers
    /// that need to hold them in different places.
    pub fn into_parts(self) -> (SensorGuard, broadcast::Receiver<u64>) {
        (self.guard, self.rx)
    }
}

pub struct SensorGuard {
    state: Arc<Mutex<SourceState>>,
}

impl Drop for SensorGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some(active) = state.active.take() {
                // Dropping the guard deregisters the hardware listener.
                drop(active.guard);
                if let Some(pump) = active.pump {
                    pump.abort();
                }
            }
        }
    }
}
