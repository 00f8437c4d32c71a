//! Motion Sampler
//!
//! Turns a raw, bursty, permission-gated motion event source into a steady
//! stream of fully populated samples at no more than the target rate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::lock;
use crate::error::{CaptureError, SensorKind};

// =============================================================================
// SAMPLES
// =============================================================================

/// Linear acceleration on three axes (m/s²).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    /// X axis.
    pub x: f64,
    /// Y axis.
    pub y: f64,
    /// Z axis.
    pub z: f64,
}

/// Rotation rate (deg/s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationRate {
    /// Around Z.
    pub alpha: f64,
    /// Around X.
    pub beta: f64,
    /// Around Y.
    pub gamma: f64,
}

/// A normalized motion sample. Every field is always a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// Source timestamp (ms).
    pub timestamp: f64,
    /// Acceleration without gravity.
    pub acceleration: Axes,
    /// Acceleration including gravity.
    pub acceleration_including_gravity: Axes,
    /// Rotation rate.
    pub rotation_rate: RotationRate,
    /// Sampling interval reported by the source (ms).
    pub interval: f64,
}

/// Partial axis readings as the platform reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawAxes {
    /// X axis.
    pub x: Option<f64>,
    /// Y axis.
    pub y: Option<f64>,
    /// Z axis.
    pub z: Option<f64>,
}

/// Partial rotation readings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawRotation {
    /// Around Z.
    pub alpha: Option<f64>,
    /// Around X.
    pub beta: Option<f64>,
    /// Around Y.
    pub gamma: Option<f64>,
}

/// One event from the platform motion source. Any part may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMotionEvent {
    /// Event time (ms, monotonic).
    pub timestamp_ms: f64,
    /// Acceleration without gravity.
    pub acceleration: Option<RawAxes>,
    /// Acceleration including gravity.
    pub acceleration_including_gravity: Option<RawAxes>,
    /// Rotation rate.
    pub rotation_rate: Option<RawRotation>,
    /// Reported interval (ms).
    pub interval: Option<f64>,
}

impl From<Option<RawAxes>> for Axes {
    fn from(raw: Option<RawAxes>) -> Self {
        let raw = raw.unwrap_or_default();
        Self {
            x: raw.x.unwrap_or(0.0),
            y: raw.y.unwrap_or(0.0),
            z: raw.z.unwrap_or(0.0),
        }
    }
}

impl From<Option<RawRotation>> for RotationRate {
    fn from(raw: Option<RawRotation>) -> Self {
        let raw = raw.unwrap_or_default();
        Self {
            alpha: raw.alpha.unwrap_or(0.0),
            beta: raw.beta.unwrap_or(0.0),
            gamma: raw.gamma.unwrap_or(0.0),
        }
    }
}

impl From<&RawMotionEvent> for MotionSample {
    fn from(event: &RawMotionEvent) -> Self {
        Self {
            timestamp: event.timestamp_ms,
            acceleration: event.acceleration.into(),
            acceleration_including_gravity: event.acceleration_including_gravity.into(),
            rotation_rate: event.rotation_rate.into(),
            interval: event.interval.unwrap_or(0.0),
        }
    }
}

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Admits an event only if the minimum spacing has elapsed since the last
/// admitted one. Rejected events are discarded, never buffered.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval_ms: f64,
    last: Option<f64>,
}

impl RateLimiter {
    /// Limit to `target_hz` admissions per second.
    pub fn new(target_hz: f64) -> Self {
        let min_interval_ms = if target_hz > 0.0 { 1000.0 / target_hz } else { 0.0 };
        Self {
            min_interval_ms,
            last: None,
        }
    }

    /// Minimum spacing between admitted events (ms).
    pub fn min_interval_ms(&self) -> f64 {
        self.min_interval_ms
    }

    /// Decide on an event stamped `timestamp_ms`.
    pub fn admit(&mut self, timestamp_ms: f64) -> bool {
        match self.last {
            Some(last) if timestamp_ms - last < self.min_interval_ms => false,
            _ => {
                self.last = Some(timestamp_ms);
                true
            }
        }
    }
}

// =============================================================================
// SOURCE
// =============================================================================

/// Platform motion event source.
#[async_trait]
pub trait MotionSource: Send + Sync {
    /// Whether the platform gates motion events behind a permission prompt.
    fn requires_permission(&self) -> bool {
        false
    }

    /// Prompt for permission. Only called when [`requires_permission`](Self::requires_permission).
    async fn request_permission(&self) -> bool;

    /// Subscribe to raw events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::Receiver<RawMotionEvent>;
}

// =============================================================================
// SAMPLER
// =============================================================================

/// Sampler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionConfig {
    /// Maximum samples per second.
    pub target_hz: f64,
    /// Window after `start` in which at least one raw event is expected.
    pub grace: Duration,
    /// Samples per `imu_batch` message.
    pub batch_size: usize,
    /// Capacity of the sample queue. Samples are dropped when it is full.
    pub queue_capacity: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            target_hz: 60.0,
            grace: Duration::from_secs(2),
            batch_size: 30,
            queue_capacity: 256,
        }
    }
}

/// Observable sampler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerStatus {
    /// Not started, or stopped.
    Idle,
    /// Started, no raw event yet.
    Waiting,
    /// Raw events are arriving.
    Streaming,
    /// No raw event within the grace window. Diagnostic, not an error.
    Silent,
}

struct Emitter {
    running: bool,
    consumer: Option<mpsc::Sender<MotionSample>>,
}

struct Inner {
    emitter: Mutex<Emitter>,
    status: watch::Sender<SamplerStatus>,
}

impl Inner {
    fn emit(&self, sample: MotionSample) {
        let emitter = lock(&self.emitter);
        if !emitter.running {
            return;
        }
        let Some(consumer) = emitter.consumer.as_ref() else {
            return;
        };
        match consumer.try_send(sample) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => debug!("Sample queue full, dropping sample"),
            Err(mpsc::error::TrySendError::Closed(_)) => debug!("Sample consumer went away"),
        }
    }
}

/// Rate-limited motion sampler.
pub struct MotionSampler {
    source: Arc<dyn MotionSource>,
    config: MotionConfig,
    granted: bool,
    inner: Arc<Inner>,
    task: Option<JoinHandle<()>>,
}

impl MotionSampler {
    /// Create a sampler over `source`.
    pub fn new(source: Arc<dyn MotionSource>, config: MotionConfig) -> Self {
        let (status, _) = watch::channel(SamplerStatus::Idle);
        Self {
            source,
            config,
            granted: false,
            inner: Arc::new(Inner {
                emitter: Mutex::new(Emitter {
                    running: false,
                    consumer: None,
                }),
                status,
            }),
            task: None,
        }
    }

    /// Sampler configuration.
    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Negotiate permission. Never re-prompts once granted.
    pub async fn request_access(&mut self) -> bool {
        if self.granted {
            return true;
        }

        if !self.source.requires_permission() {
            self.granted = true;
            return true;
        }

        self.granted = self.source.request_permission().await;
        if self.granted {
            info!("Motion access granted");
        } else {
            warn!("Motion access denied");
        }
        self.granted
    }

    /// Register the sample consumer, replacing any previous one.
    pub fn on_data(&mut self) -> mpsc::Receiver<MotionSample> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        lock(&self.inner.emitter).consumer = Some(tx);
        rx
    }

    /// Watch the sampler status.
    pub fn status(&self) -> watch::Receiver<SamplerStatus> {
        self.inner.status.subscribe()
    }

    /// Whether sampling is active.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Subscribe to the source and start emitting samples.
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        if self.task.is_some() {
            return Ok(());
        }

        if !self.request_access().await {
            return Err(CaptureError::PermissionDenied(SensorKind::Motion));
        }

        let events = self.source.subscribe();
        lock(&self.inner.emitter).running = true;
        self.inner.status.send_replace(SamplerStatus::Waiting);

        self.task = Some(tokio::spawn(run_sampler(
            events,
            self.inner.clone(),
            self.config.target_hz,
            self.config.grace,
        )));

        info!("Motion sampling started at {} Hz", self.config.target_hz);
        Ok(())
    }

    /// Stop sampling. No sample is emitted after this returns. Idempotent.
    pub fn stop(&mut self) {
        lock(&self.inner.emitter).running = false;

        if let Some(task) = self.task.take() {
            task.abort();
            self.inner.status.send_replace(SamplerStatus::Idle);
            info!("Motion sampling stopped");
        }
    }
}

impl Drop for MotionSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_sampler(
    mut events: mpsc::Receiver<RawMotionEvent>,
    inner: Arc<Inner>,
    target_hz: f64,
    grace: Duration,
) {
    let mut limiter = RateLimiter::new(target_hz);
    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);
    let mut seen = false;
    let mut grace_over = false;

    loop {
        tokio::select! {
            _ = &mut deadline, if !seen && !grace_over => {
                grace_over = true;
                warn!("No motion events within {:?}; sensors may be missing or blocked", grace);
                inner.status.send_replace(SamplerStatus::Silent);
            }
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Motion source ended");
                    return;
                };
                if !seen {
                    seen = true;
                    inner.status.send_replace(SamplerStatus::Streaming);
                }
                if limiter.admit(event.timestamp_ms) {
                    inner.emit(MotionSample::from(&event));
                }
            }
        }
    }
}
