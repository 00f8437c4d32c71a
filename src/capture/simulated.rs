//! Simulated sensors.
//!
//! Stand-ins for platform motion sensors and camera, used by the demo binary
//! and integration-style tests. Output is noisy but seedable.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::capture::media::{
    CameraDevice, CameraFeed, CaptureConstraints, MediaChunk, PreviewStream,
};
use crate::capture::motion::{MotionSource, RawAxes, RawMotionEvent, RawRotation};
use crate::core::clock::epoch_millis;
use crate::error::CaptureError;

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// =============================================================================
// MOTION
// =============================================================================

/// Noisy motion source emitting at a fixed rate.
#[derive(Debug, Clone)]
pub struct SimulatedMotionSource {
    /// Raw events per second.
    pub hz: f64,
    /// Simulate a permission prompt.
    pub requires_permission: bool,
    /// Answer to the prompt.
    pub grant: bool,
    /// Fraction of events that lack rotation data.
    pub drop_rotation: f64,
    /// RNG seed. `None` for entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatedMotionSource {
    fn default() -> Self {
        Self {
            hz: 200.0,
            requires_permission: false,
            grant: true,
            drop_rotation: 0.05,
            seed: None,
        }
    }
}

#[async_trait]
impl MotionSource for SimulatedMotionSource {
    fn requires_permission(&self) -> bool {
        self.requires_permission
    }

    async fn request_permission(&self) -> bool {
        self.grant
    }

    fn subscribe(&self) -> mpsc::Receiver<RawMotionEvent> {
        let (tx, rx) = mpsc::channel(512);
        let period = Duration::from_secs_f64(1.0 / self.hz.max(1.0));
        let drop_rotation = self.drop_rotation;
        let mut rng = rng_from(self.seed);

        tokio::spawn(async move {
            let origin = Instant::now();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let event = RawMotionEvent {
                    timestamp_ms: origin.elapsed().as_secs_f64() * 1000.0,
                    acceleration: Some(noisy_axes(&mut rng, 0.0)),
                    acceleration_including_gravity: Some(noisy_axes(&mut rng, 9.81)),
                    rotation_rate: if rng.gen_bool(drop_rotation.clamp(0.0, 1.0)) {
                        None
                    } else {
                        Some(RawRotation {
                            alpha: Some(rng.gen_range(-5.0..5.0)),
                            beta: Some(rng.gen_range(-5.0..5.0)),
                            gamma: Some(rng.gen_range(-5.0..5.0)),
                        })
                    },
                    interval: Some(period.as_secs_f64() * 1000.0),
                };

                match tx.try_send(event) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        });

        rx
    }
}

fn noisy_axes(rng: &mut StdRng, gravity_y: f64) -> RawAxes {
    RawAxes {
        x: Some(rng.gen_range(-0.2..0.2)),
        y: Some(gravity_y + rng.gen_range(-0.2..0.2)),
        z: Some(rng.gen_range(-0.2..0.2)),
    }
}

// =============================================================================
// CAMERA
// =============================================================================

/// Camera producing random bytes in place of encoded video.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    /// Formats the fake encoder claims to support.
    pub supported: Vec<String>,
    /// Bytes per chunk, roughly.
    pub chunk_bytes: usize,
    /// `false` simulates a missing or refused camera.
    pub available: bool,
    /// RNG seed. `None` for entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self {
            supported: vec!["video/webm;codecs=vp8".to_string(), "video/webm".to_string()],
            chunk_bytes: 10 * 1024,
            available: true,
            seed: None,
        }
    }
}

#[async_trait]
impl CameraDevice for SimulatedCamera {
    fn is_format_supported(&self, mime: &str) -> bool {
        self.supported.iter().any(|f| f == mime)
    }

    async fn acquire(
        &self,
        constraints: CaptureConstraints,
    ) -> Result<Box<dyn CameraFeed>, CaptureError> {
        if !self.available {
            return Err(CaptureError::CameraUnavailable {
                reason: "NotFoundError: no capture device".into(),
            });
        }

        Ok(Box::new(SimulatedFeed {
            constraints,
            chunk_bytes: self.chunk_bytes,
            seed: self.seed,
            live: Arc::new(AtomicBool::new(true)),
            encoder: None,
        }))
    }
}

struct SimulatedFeed {
    constraints: CaptureConstraints,
    chunk_bytes: usize,
    seed: Option<u64>,
    live: Arc<AtomicBool>,
    encoder: Option<JoinHandle<()>>,
}

impl CameraFeed for SimulatedFeed {
    fn preview(&self) -> PreviewStream {
        PreviewStream::new(
            "Simulated Camera",
            self.constraints.width,
            self.constraints.height,
            self.live.clone(),
        )
    }

    fn record(
        &mut self,
        _format: Option<&str>,
        timeslice: Duration,
    ) -> mpsc::Receiver<MediaChunk> {
        let (tx, rx) = mpsc::channel(16);
        let chunk_bytes = self.chunk_bytes;
        let mut rng = rng_from(self.seed);

        if let Some(previous) = self.encoder.take() {
            previous.abort();
        }

        self.encoder = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + timeslice, timeslice);
            let mut first = true;
            loop {
                ticker.tick().await;
                // Encoders commonly flush an empty first slice.
                let size = if first {
                    0
                } else {
                    chunk_bytes / 2 + rng.gen_range(0..=chunk_bytes)
                };
                first = false;

                let mut data = vec![0u8; size];
                rng.fill_bytes(&mut data);
                let chunk = MediaChunk {
                    data,
                    produced_at: epoch_millis(),
                };
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        }));

        rx
    }

    fn release(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            encoder.abort();
        }
        self.live.store(false, Ordering::SeqCst);
    }
}
